//! OCR providers turn pixels into [`Detection`]s.
//!
//! The classifier never talks to a model directly; it only sees what an
//! [`OcrProvider`] returns. [`OnnxOcr`] is the bundled implementation.

mod detector;
mod onnx;
mod recognizer;
mod session;
mod util;

use image::RgbImage;

pub use onnx::{OnnxOcr, OnnxOcrBuilder};
pub use session::ExecutionProvider;

use crate::{Detection, OcrError};

/// Source of text detections for an image.
///
/// Providers usually hold model sessions; build one per run and reuse it.
/// Implementations need not be thread-safe.
pub trait OcrProvider {
    /// Detects text in `image`. An empty result means no text was found.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError>;
}

impl<P: OcrProvider + ?Sized> OcrProvider for &P {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError> {
        (**self).detect(image)
    }
}

impl<P: OcrProvider + ?Sized> OcrProvider for Box<P> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError> {
        (**self).detect(image)
    }
}
