use std::path::PathBuf;

use image::RgbImage;
use tracing::instrument;

use super::{
    detector::{BoxOptions, TextDetector},
    recognizer::TextRecognizer,
    session::{
        ExecutionProvider, SessionOptions, ShapeProfile, ACCELERATED_PROVIDERS, CPU_PROVIDERS,
    },
    util::crop_region,
    OcrProvider,
};
use crate::{Detection, OcrError};

pub struct OnnxOcrBuilder {
    threads: usize,
    accelerated: bool,
    execution_providers: Option<Vec<ExecutionProvider>>,
    det_path: PathBuf,
    rec_path: PathBuf,
    keys_path: PathBuf,
    cache_path: Option<PathBuf>,
    box_options: BoxOptions,
}

impl OnnxOcrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Registers the compiled-in GPU backends instead of running on the CPU only.
    pub fn accelerated(mut self, accelerated: bool) -> Self {
        self.accelerated = accelerated;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = path.into();
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_path = model_path.into();
        self.keys_path = keys_path.into();
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.box_options.max_side_len = max_side_len;
        self
    }

    pub fn box_threshold(mut self, threshold: f32) -> Self {
        self.box_options.box_threshold = threshold;
        self
    }

    pub fn box_score_threshold(mut self, threshold: f32) -> Self {
        self.box_options.box_score_threshold = threshold;
        self
    }

    pub fn unclip_ratio(mut self, ratio: f32) -> Self {
        self.box_options.unclip_ratio = ratio;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Registers exactly these backends, in order, overriding [`accelerated`](Self::accelerated).
    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = Some(providers.into_iter().collect());
        self
    }

    fn providers(&self) -> &[ExecutionProvider] {
        match &self.execution_providers {
            Some(providers) => providers,
            None if self.accelerated => ACCELERATED_PROVIDERS,
            None => CPU_PROVIDERS,
        }
    }

    #[instrument(
        skip(self),
        fields(det = %self.det_path.display(), rec = %self.rec_path.display())
    )]
    pub fn build(self) -> Result<OnnxOcr, OcrError> {
        let providers = self.providers();
        let max_side = self.box_options.max_side_len;

        let detector = TextDetector::load(
            &self.det_path,
            &SessionOptions {
                threads: self.threads,
                providers,
                cache_path: self.cache_path.clone(),
                profile: ShapeProfile {
                    min: "x:1x3x32x32".to_string(),
                    opt: format!("x:1x3x{max_side}x{max_side}"),
                    max: format!("x:1x3x{max_side}x{max_side}"),
                },
            },
        )?;
        let recognizer = TextRecognizer::load(
            &self.rec_path,
            &self.keys_path,
            &SessionOptions {
                threads: self.threads,
                providers,
                cache_path: self.cache_path.clone(),
                profile: ShapeProfile {
                    min: "x:1x3x48x1".to_string(),
                    opt: "x:1x3x48x256".to_string(),
                    max: format!("x:1x3x48x{}", u16::MAX),
                },
            },
        )?;

        tracing::info!(providers = ?providers, "ocr engine ready");
        Ok(OnnxOcr {
            detector,
            recognizer,
            box_options: self.box_options,
        })
    }
}

impl Default for OnnxOcrBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            accelerated: true,
            execution_providers: None,
            det_path: "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx".into(),
            rec_path: "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx".into(),
            keys_path: "models/ppocr_keys_v1.txt".into(),
            cache_path: None,
            box_options: BoxOptions {
                max_side_len: 1024,
                box_threshold: 0.3,
                box_score_threshold: 0.5,
                unclip_ratio: 1.6,
            },
        }
    }
}

/// Detector + recognizer pair running on ONNX Runtime.
pub struct OnnxOcr {
    detector: TextDetector,
    recognizer: TextRecognizer,
    box_options: BoxOptions,
}

impl OcrProvider for OnnxOcr {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, OcrError> {
        let boxes = self.detector.detect(image, &self.box_options)?;
        let mut detections = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let Some(crop) = crop_region(image, &text_box.rect) else {
                continue;
            };
            let line = self.recognizer.recognize(&crop)?;
            let confidence = line.mean_score().unwrap_or(text_box.score);
            // Minimum rotated rects come back closed; drop the repeated corner.
            let corners = text_box
                .rect
                .exterior()
                .coords()
                .take(4)
                .map(|c| (c.x as f64, c.y as f64));
            detections.push(Detection::new(corners, line.text, confidence));
        }
        log::debug!("{} text regions", detections.len());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerated_flag_picks_provider_list() {
        let builder = OnnxOcrBuilder::new();
        assert_eq!(builder.providers(), ACCELERATED_PROVIDERS);
        assert_eq!(builder.accelerated(false).providers(), CPU_PROVIDERS);
    }

    #[test]
    fn explicit_providers_override_accelerated_flag() {
        let builder = OnnxOcrBuilder::new()
            .accelerated(true)
            .with_execution_providers([ExecutionProvider::Cpu]);
        assert_eq!(builder.providers(), [ExecutionProvider::Cpu]);

        let empty = OnnxOcrBuilder::new().with_execution_providers([]);
        assert!(empty.providers().is_empty());
    }
}
