use std::path::PathBuf;

use thiserror::Error;

/// Precondition violations rejected before any verdict is produced.
#[derive(Debug, Error, PartialEq)]
pub enum ClassifyError {
    #[error("image frame must have positive dimensions, got {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("threshold `{name}` must be a finite, non-negative number, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("onnx runtime error: {0}")]
    Runtime(#[from] ort::Error),
    #[error("unexpected tensor shape at `{stage}`: {source}")]
    Shape {
        stage: &'static str,
        source: ndarray::ShapeError,
    },
    #[error("model produced no output at `{stage}`")]
    MissingOutput { stage: &'static str },
    #[error("failed to read recognition keys from `{}`: {source}", .path.display())]
    Keys {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ocr backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Thresholds(#[from] ClassifyError),
    #[error("the three-way policy needs a rejected directory")]
    MissingRejectedDir,
    #[error("kept and rejected directories must differ, both are `{}`", .0.display())]
    SameDestination(PathBuf),
}

/// Failures that abort a whole triage run. Per-image failures never surface here.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("cannot read source directory `{}`: {source}", .path.display())]
    SourceDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("the three-way policy needs a rejected directory")]
    MissingRejectedDir,
    #[error("cannot create destination directory `{}`: {source}", .path.display())]
    DestinationDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
