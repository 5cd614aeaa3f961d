use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundingBox {
    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }
}

/// External detection capability: returns every face-like region in a still.
pub trait FaceDetector {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
        (**self).detect(image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceResult {
    pub present: bool,
    pub region_count: usize,
}

/// Adapts a [`FaceDetector`] into the boolean presence contract.
#[derive(Debug, Clone)]
pub struct PresenceGate<D> {
    detector: D,
    min_face_size: u32,
}

impl<D: FaceDetector> PresenceGate<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            min_face_size: 0,
        }
    }

    /// Regions narrower or shorter than `pixels` are ignored.
    pub fn with_min_face_size(mut self, pixels: u32) -> Self {
        self.min_face_size = pixels;
        self
    }

    pub fn min_face_size(&self) -> u32 {
        self.min_face_size
    }

    /// Decodes an encoded still and reports whether at least one face is present.
    pub fn check(&self, image: &[u8]) -> AppResult<PresenceResult> {
        let rgb = decode_still(image)?;
        let regions = self.detector.detect(&rgb)?;
        let min = i64::from(self.min_face_size);
        let region_count = regions
            .iter()
            .filter(|region| region.width() >= min && region.height() >= min)
            .count();
        debug!(
            detected = regions.len(),
            accepted = region_count,
            min_face_size = self.min_face_size,
            "presence check complete"
        );
        Ok(PresenceResult {
            present: region_count > 0,
            region_count,
        })
    }
}

pub fn decode_still(image: &[u8]) -> AppResult<RgbImage> {
    if image.is_empty() {
        return Err(AppError::InvalidImage {
            message: "no image data".into(),
        });
    }
    let decoded = image::load_from_memory(image).map_err(|err| AppError::InvalidImage {
        message: err.to_string(),
    })?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(AppError::InvalidImage {
            message: "image has zero area".into(),
        });
    }
    Ok(rgb)
}

#[cfg(feature = "dlib")]
pub use dlib::DlibDetector;

#[cfg(feature = "dlib")]
mod dlib {
    use std::path::Path;

    use dlib_face_recognition::{
        FaceDetector as HogDetector, FaceDetectorCnn, FaceDetectorTrait, ImageMatrix,
    };
    use image::RgbImage;
    use tracing::debug;

    use super::{BoundingBox, FaceDetector};
    use crate::errors::{AppError, AppResult};

    enum Inner {
        Hog(HogDetector),
        Cnn(FaceDetectorCnn),
    }

    /// dlib HOG detector, or the CNN detector when a model file is supplied.
    pub struct DlibDetector {
        inner: Inner,
    }

    impl DlibDetector {
        pub fn new(cnn_model: Option<&Path>) -> AppResult<Self> {
            let inner = match cnn_model {
                Some(path) => {
                    debug!(path = %path.display(), "loading CNN face detector model");
                    let detector =
                        FaceDetectorCnn::open(path).map_err(|message| AppError::ModelLoad {
                            path: path.to_path_buf(),
                            message,
                        })?;
                    Inner::Cnn(detector)
                }
                None => Inner::Hog(HogDetector::new()),
            };
            Ok(Self { inner })
        }
    }

    impl FaceDetector for DlibDetector {
        fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
            let matrix = ImageMatrix::from_image(image);
            let locations = match &self.inner {
                Inner::Hog(detector) => detector.face_locations(&matrix),
                Inner::Cnn(detector) => detector.face_locations(&matrix),
            };
            Ok(locations
                .iter()
                .map(|rect| BoundingBox {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Cursor;

    use image::{DynamicImage, ImageOutputFormat, Rgb};

    struct StubDetector {
        regions: Vec<BoundingBox>,
        calls: Cell<usize>,
    }

    impl FaceDetector for StubDetector {
        fn detect(&self, _image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.regions.clone())
        }
    }

    fn region(size: i64) -> BoundingBox {
        BoundingBox {
            left: 10,
            top: 10,
            right: 10 + size,
            bottom: 10 + size,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 8, Rgb([120, 80, 60]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn region_found_means_present() {
        let gate = PresenceGate::new(StubDetector {
            regions: vec![region(40)],
            calls: Cell::new(0),
        });
        let result = gate.check(&png_bytes()).unwrap();
        assert!(result.present);
        assert_eq!(result.region_count, 1);
    }

    #[test]
    fn small_regions_are_filtered_by_threshold() {
        let gate = PresenceGate::new(StubDetector {
            regions: vec![region(20), region(64)],
            calls: Cell::new(0),
        })
        .with_min_face_size(48);
        let result = gate.check(&png_bytes()).unwrap();
        assert_eq!(result.region_count, 1);

        let strict = PresenceGate::new(StubDetector {
            regions: vec![region(20)],
            calls: Cell::new(0),
        })
        .with_min_face_size(48);
        assert!(!strict.check(&png_bytes()).unwrap().present);
    }

    #[test]
    fn empty_or_garbage_input_is_invalid_image() {
        let gate = PresenceGate::new(StubDetector {
            regions: vec![region(40)],
            calls: Cell::new(0),
        });
        assert!(matches!(gate.check(&[]), Err(AppError::InvalidImage { .. })));
        assert!(matches!(
            gate.check(b"definitely not an image"),
            Err(AppError::InvalidImage { .. })
        ));
        assert_eq!(gate.detector.calls.get(), 0);
    }

    #[test]
    fn truncated_png_is_an_input_error() {
        let bytes = png_bytes();
        let err = decode_still(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, AppError::InvalidImage { .. }));
        assert_eq!(err.exit_code(), std::process::ExitCode::from(2));
    }
}
