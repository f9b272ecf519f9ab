//! Filters an image corpus down to images without meaningful embedded text.
//!
//! OCR detections are reduced to a few area and character statistics and run
//! through an ordered rule list that labels each image `none`, `overlay` or
//! `meme`. The [`triage`] driver applies that verdict to a whole directory.

pub mod classifier;
pub mod config;
mod error;
pub mod geometry;
pub mod ocr;
mod result;
pub mod triage;

pub use classifier::{
    classify, classify_binary, BinaryClassifier, Decision, Policy, Rule, TextClassifier,
    Thresholds,
};
pub use error::*;
pub use geometry::{compute_metrics, AggregateMetrics, RegionMetrics};
pub use ocr::OcrProvider;
pub use result::*;

pub use ort as runtime;
