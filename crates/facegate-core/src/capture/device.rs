use v4l::buffer::Type;
use v4l::capability::Flags as CapabilityFlags;
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

use super::{convert_raw_frame, encode_png, CapturedImage, DeviceLocator, FrameSource};

#[derive(Debug, Clone)]
pub struct V4lCaptureConfig {
    pub device: DeviceLocator,
    pub pixel_format: String,
    pub warmup_frames: u32,
}

/// Grabs single frames from a V4L2 device and hands them on as PNG stills.
pub struct V4lFrameSource {
    config: V4lCaptureConfig,
    device: Option<v4l::Device>,
    fourcc: FourCC,
}

impl V4lFrameSource {
    pub fn new(config: V4lCaptureConfig) -> AppResult<Self> {
        let fourcc = parse_fourcc(&config.pixel_format)
            .ok_or_else(|| AppError::UnsupportedFormat(config.pixel_format.clone()))?;
        Ok(Self {
            config,
            device: None,
            fourcc,
        })
    }

    fn open(&mut self) -> AppResult<&mut v4l::Device> {
        if self.device.is_none() {
            let device = open_device(&self.config.device)?;
            let caps = device.query_caps()?;
            let flags = caps.capabilities;
            if !flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
                return Err(AppError::Capability("missing VIDEO_CAPTURE".into()));
            }
            if !flags.intersects(CapabilityFlags::READ_WRITE | CapabilityFlags::STREAMING) {
                return Err(AppError::Capability("missing READ_WRITE or STREAMING".into()));
            }
            if !device
                .enum_formats()?
                .iter()
                .any(|format| format.fourcc == self.fourcc)
            {
                return Err(AppError::UnsupportedFormat(self.config.pixel_format.clone()));
            }
            info!(
                device = %self.config.device.display(),
                driver = %caps.driver,
                card = %caps.card,
                "opened capture device"
            );
            self.device = Some(device);
        }
        self.device
            .as_mut()
            .ok_or_else(|| AppError::Capability("capture device not open".into()))
    }
}

impl FrameSource for V4lFrameSource {
    fn acquire_frame(&mut self) -> AppResult<Option<CapturedImage>> {
        let fourcc = self.fourcc;
        let warmup = self.config.warmup_frames;
        let origin = self.config.device.display();
        let device = self.open()?;

        let mut format = device.format()?;
        format.fourcc = fourcc;
        let format = device.set_format(&format)?;
        let pixel_format = fourcc_to_string(format.fourcc);

        let mut stream = Stream::with_buffers(device, Type::VideoCapture, 4)?;
        for idx in 0..warmup {
            stream.next().map_err(|err| {
                AppError::FrameProcessing(format!(
                    "failed to read warm-up frame {}: {}",
                    idx + 1,
                    err
                ))
            })?;
        }

        let (data, _) = stream.next()?;
        let image = convert_raw_frame(data, &pixel_format, format.width, format.height)?;
        debug!(
            pixel_format = %pixel_format,
            width = format.width,
            height = format.height,
            "captured frame"
        );
        Ok(Some(CapturedImage::new(encode_png(&image)?, origin)))
    }
}

/// Opens and immediately releases the device.
pub fn probe_device(locator: &DeviceLocator) -> AppResult<()> {
    open_device(locator).map(|_| ())
}

fn open_device(locator: &DeviceLocator) -> AppResult<v4l::Device> {
    let result = match locator {
        DeviceLocator::Index(index) => v4l::Device::new(*index as usize),
        DeviceLocator::Path(path) => v4l::Device::with_path(path),
    };
    result.map_err(|err| AppError::DeviceOpen {
        device: locator.display(),
        source: err,
    })
}

fn parse_fourcc(code: &str) -> Option<FourCC> {
    if code.is_empty() || code.len() > 4 {
        return None;
    }
    let mut repr = [b' '; 4];
    for (i, byte) in code.as_bytes().iter().enumerate() {
        repr[i] = *byte;
    }
    Some(FourCC::new(&repr))
}

fn fourcc_to_string(fourcc: FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr)
        .trim_matches(|c| c == char::from(0) || c == ' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_round_trips_short_codes() {
        let fourcc = parse_fourcc("Y16").unwrap();
        assert_eq!(fourcc_to_string(fourcc), "Y16");
        assert!(parse_fourcc("TOOLONG").is_none());
    }
}
