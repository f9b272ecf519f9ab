use std::fmt;

use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::ClassifyError;

/// One text region reported by an OCR provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Corner points of the detected region, usually a (possibly rotated) quadrilateral.
    pub region: LineString<f64>,
    pub text: String,
    /// Recognition confidence in `[0, 1]`. Not consulted by the current rules.
    pub confidence: f32,
}

impl Detection {
    pub fn new(
        region: impl IntoIterator<Item = impl Into<Coord<f64>>>,
        text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            region: LineString::new(region.into_iter().map(Into::into).collect()),
            text: text.into(),
            confidence,
        }
    }

    /// Length of the recognized text in characters.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Dimensions of the image being classified. Both sides are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageFrame {
    width: u32,
    height: u32,
}

impl ImageFrame {
    pub fn new(width: u32, height: u32) -> Result<Self, ClassifyError> {
        if width == 0 || height == 0 {
            return Err(ClassifyError::InvalidFrame { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// Three-way text presence verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    None,
    Overlay,
    Meme,
}

impl Verdict {
    /// `none` and `overlay` images stay in the dataset.
    pub fn is_kept(self) -> bool {
        matches!(self, Verdict::None | Verdict::Overlay)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::None => "none",
            Verdict::Overlay => "overlay",
            Verdict::Meme => "meme",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of the stricter two-way policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryVerdict {
    TextPresent,
    NoText,
}

impl BinaryVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryVerdict::TextPresent => "text_present",
            BinaryVerdict::NoText => "no_text",
        }
    }
}

impl fmt::Display for BinaryVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
