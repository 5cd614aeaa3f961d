use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder};
use tracing::debug;

use crate::errors::{AppError, AppResult};

#[cfg(feature = "v4l")]
mod device;

#[cfg(feature = "v4l")]
pub use device::{probe_device, V4lCaptureConfig, V4lFrameSource};

pub const DEFAULT_PIXEL_FORMAT: &str = "Y16";

/// An encoded still handed to the presence gate and, optionally, persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub origin: String,
}

impl CapturedImage {
    pub fn new(bytes: Vec<u8>, origin: impl Into<String>) -> Self {
        Self {
            bytes,
            origin: origin.into(),
        }
    }
}

/// Yields one still per call; `Ok(None)` means the operator aborted acquisition.
pub trait FrameSource {
    fn acquire_frame(&mut self) -> AppResult<Option<CapturedImage>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn acquire_frame(&mut self) -> AppResult<Option<CapturedImage>> {
        (**self).acquire_frame()
    }
}

/// Reads an already-encoded image from disk on every acquisition.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileFrameSource {
    fn acquire_frame(&mut self) -> AppResult<Option<CapturedImage>> {
        let bytes = fs::read(&self.path).map_err(|_| AppError::MissingInput {
            path: self.path.clone(),
        })?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "read still from file");
        Ok(Some(CapturedImage::new(
            bytes,
            self.path.display().to_string(),
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLocator {
    Index(u32),
    Path(PathBuf),
}

impl DeviceLocator {
    pub fn from_option(device: Option<String>) -> Self {
        match device {
            Some(text) => {
                if let Ok(index) = text.parse::<u32>() {
                    DeviceLocator::Index(index)
                } else {
                    DeviceLocator::Path(PathBuf::from(text))
                }
            }
            None => DeviceLocator::Index(0),
        }
    }

    pub fn display(&self) -> String {
        match self {
            DeviceLocator::Index(i) => format!("/dev/video{i}"),
            DeviceLocator::Path(path) => path.display().to_string(),
        }
    }
}

/// Converts a raw single-plane frame into 8-bit grayscale.
///
/// Y16 keeps the high byte of each little-endian sample, GREY/Y08 are copied and
/// YUYV keeps the luma samples only.
pub fn convert_raw_frame(
    data: &[u8],
    pixel_format: &str,
    width: u32,
    height: u32,
) -> AppResult<GrayImage> {
    let expected_pixels = width as usize * height as usize;

    let buffer = match pixel_format {
        "Y16" => {
            if data.len() < expected_pixels * 2 {
                return Err(AppError::FrameProcessing(format!(
                    "expected {} bytes for Y16 frame, got {}",
                    expected_pixels * 2,
                    data.len()
                )));
            }
            data[..expected_pixels * 2]
                .chunks_exact(2)
                .map(|pair| pair[1])
                .collect()
        }
        "GREY" | "Y08" => {
            if data.len() < expected_pixels {
                return Err(AppError::FrameProcessing(format!(
                    "expected {} bytes for {} frame, got {}",
                    expected_pixels,
                    pixel_format,
                    data.len()
                )));
            }
            data[..expected_pixels].to_vec()
        }
        "YUYV" => {
            let expected_bytes = expected_pixels * 2;
            if data.len() < expected_bytes {
                return Err(AppError::FrameProcessing(format!(
                    "expected {} bytes for YUYV frame, got {}",
                    expected_bytes,
                    data.len()
                )));
            }
            let mut buffer = Vec::with_capacity(expected_pixels);
            for chunk in data[..expected_bytes].chunks_exact(4) {
                buffer.push(chunk[0]);
                if buffer.len() == expected_pixels {
                    break;
                }
                buffer.push(chunk[2]);
            }
            if buffer.len() != expected_pixels {
                return Err(AppError::FrameProcessing(
                    "incomplete YUYV macro-pixel encountered".into(),
                ));
            }
            buffer
        }
        other => {
            return Err(AppError::FrameProcessing(format!(
                "unsupported conversion from pixel format {other}"
            )))
        }
    };

    GrayImage::from_vec(width, height, buffer)
        .ok_or_else(|| AppError::FrameProcessing("failed to build image buffer".into()))
}

pub fn encode_png(image: &GrayImage) -> AppResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    PngEncoder::new(&mut out)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::L8)
        .map_err(|err| AppError::FrameProcessing(format!("failed to encode PNG: {err}")))?;
    Ok(out.into_inner())
}
