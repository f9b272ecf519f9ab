//! Run configuration, loaded from TOML and overridden from the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    classifier::{BinaryClassifier, Policy, TextClassifier, Thresholds},
    ocr::OnnxOcrBuilder,
    ConfigError,
};

/// Which classifier decides keep vs reject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// `none`/`overlay` kept, `meme` rejected.
    #[default]
    ThreeWay,
    /// Any text above the character floor is rejected.
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Scanned recursively for candidate images.
    pub source: PathBuf,
    pub kept: PathBuf,
    /// Required by the three-way policy. Binary runs may go without one, in
    /// which case rejected images are only counted.
    pub rejected: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            source: "data_raw_all".into(),
            kept: "data_raw_no_text".into(),
            rejected: Some("data_raw_rejected".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub det_model: PathBuf,
    pub rec_model: PathBuf,
    pub keys: PathBuf,
    pub engine_cache: Option<PathBuf>,
    pub threads: usize,
    pub max_side_len: u32,
    pub box_threshold: f32,
    pub box_score_threshold: f32,
    pub unclip_ratio: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            det_model: "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx".into(),
            rec_model: "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx".into(),
            keys: "models/ppocr_keys_v1.txt".into(),
            engine_cache: None,
            threads: 4,
            max_side_len: 1024,
            box_threshold: 0.3,
            box_score_threshold: 0.5,
            unclip_ratio: 1.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub policy: PolicyKind,
    /// Run OCR on the GPU backends compiled in, instead of the CPU.
    pub use_accelerated_backend: bool,
    /// Extra attempts for an image whose OCR call failed.
    pub ocr_retries: u32,
    pub thresholds: Thresholds,
    pub paths: Paths,
    pub ocr: OcrConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            use_accelerated_backend: true,
            ocr_retries: 0,
            thresholds: Thresholds::default(),
            paths: Paths::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` when given, otherwise starts from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        path.map(Self::load).transpose().map(Option::unwrap_or_default)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        match (&self.policy, &self.paths.rejected) {
            (PolicyKind::ThreeWay, None) => Err(ConfigError::MissingRejectedDir),
            (_, Some(rejected)) if *rejected == self.paths.kept => {
                Err(ConfigError::SameDestination(rejected.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn policy(&self) -> Result<Policy, ConfigError> {
        Ok(match self.policy {
            PolicyKind::ThreeWay => Policy::ThreeWay(TextClassifier::new(self.thresholds)?),
            PolicyKind::Binary => {
                Policy::Binary(BinaryClassifier::new(self.thresholds.min_total_chars))
            }
        })
    }

    /// Engine builder for the configured models and backend.
    pub fn ocr_builder(&self) -> OnnxOcrBuilder {
        let ocr = &self.ocr;
        let builder = OnnxOcrBuilder::new()
            .det_model(&ocr.det_model)
            .rec_model(&ocr.rec_model, &ocr.keys)
            .threads(ocr.threads)
            .max_side_len(ocr.max_side_len)
            .box_threshold(ocr.box_threshold)
            .box_score_threshold(ocr.box_score_threshold)
            .unclip_ratio(ocr.unclip_ratio)
            .accelerated(self.use_accelerated_backend);
        match &ocr.engine_cache {
            Some(path) => builder.with_engine_cache_path(path),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: FilterConfig = toml::from_str("").unwrap();
        assert_eq!(config, FilterConfig::default());
        assert_eq!(config.thresholds.min_total_chars, 3);
        assert_eq!(config.thresholds.max_overlay_region_area_ratio, 0.04);
        assert!(config.use_accelerated_backend);
        config.validate().unwrap();
    }

    #[test]
    fn partial_overrides() {
        let config: FilterConfig = toml::from_str(
            r#"
            policy = "binary"
            use_accelerated_backend = false

            [thresholds]
            min_total_chars = 5
            meme_min_width_ratio = 0.8

            [paths]
            source = "in"
            kept = "out"
            "#,
        )
        .unwrap();
        assert_eq!(config.policy, PolicyKind::Binary);
        assert!(!config.use_accelerated_backend);
        assert_eq!(config.thresholds.min_total_chars, 5);
        assert_eq!(config.thresholds.meme_min_width_ratio, 0.8);
        assert_eq!(config.thresholds.meme_min_total_chars, 25);
        assert_eq!(config.paths.source, PathBuf::from("in"));
        assert_eq!(config.paths.rejected, Some(PathBuf::from("data_raw_rejected")));
        config.validate().unwrap();
        assert_eq!(
            config.policy().unwrap(),
            Policy::Binary(BinaryClassifier::new(5))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<FilterConfig>("[thresholds]\nmin_chars = 2").is_err());
    }

    #[test]
    fn three_way_needs_rejected_dir() {
        let mut config = FilterConfig::default();
        config.paths.rejected = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingRejectedDir)));

        config.policy = PolicyKind::Binary;
        config.validate().unwrap();
    }

    #[test]
    fn destinations_must_differ() {
        let mut config = FilterConfig::default();
        config.paths.rejected = Some(config.paths.kept.clone());
        assert!(matches!(config.validate(), Err(ConfigError::SameDestination(_))));
    }

    #[test]
    fn negative_threshold_is_fatal() {
        let mut config = FilterConfig::default();
        config.thresholds.meme_min_total_area_ratio = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Thresholds(_))));
        assert!(config.policy().is_err());
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = FilterConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: FilterConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
