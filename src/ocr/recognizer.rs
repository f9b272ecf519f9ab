use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{ArrayView2, Axis, Ix3};
use ort::{inputs, Session};
use tracing::instrument;

use super::session::{load_session, SessionOptions};
use crate::OcrError;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

const LINE_HEIGHT: u32 = 48;

/// Recognized content of one text line.
#[derive(Debug, Clone, Default)]
pub(crate) struct TextLine {
    pub text: String,
    pub character_scores: Vec<f32>,
}

impl TextLine {
    pub fn mean_score(&self) -> Option<f32> {
        if self.character_scores.is_empty() {
            return None;
        }
        Some(self.character_scores.iter().sum::<f32>() / self.character_scores.len() as f32)
    }
}

/// CRNN line recognizer with CTC greedy decoding.
pub(crate) struct TextRecognizer {
    session: Session,
    /// Class labels; index 0 is the CTC blank.
    keys: Vec<String>,
}

impl TextRecognizer {
    pub fn load(model: &Path, keys: &Path, options: &SessionOptions) -> Result<Self, OcrError> {
        let session = load_session(model, options)?;
        let contents = std::fs::read_to_string(keys).map_err(|source| OcrError::Keys {
            path: keys.to_path_buf(),
            source,
        })?;
        let keys = std::iter::once("#".to_string())
            .chain(contents.lines().map(str::to_string))
            .chain([" ".to_string()])
            .collect::<Vec<_>>();
        log::debug!("loaded {} recognition keys", keys.len());

        Ok(Self { session, keys })
    }

    #[instrument(
        level = "trace",
        skip(self, line),
        fields(width = line.width(), height = line.height())
    )]
    pub fn recognize(&self, line: &RgbImage) -> Result<TextLine, OcrError> {
        let scale = LINE_HEIGHT as f32 / line.height() as f32;
        let width = ((line.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let resized = imageops::resize(line, width, LINE_HEIGHT, FilterType::Triangle);
        let input = super::util::normalize_chw(&resized, &MEAN_VALUES, &NORM_VALUES)
            .insert_axis(Axis(0));

        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or(OcrError::MissingOutput { stage: "recognize" })?;
        let scores = output
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix3>()
            .map_err(|source| OcrError::Shape {
                stage: "recognize",
                source,
            })?;
        // [batch, time step, class]
        Ok(self.decode(scores.index_axis_move(Axis(0), 0)))
    }

    /// Greedy CTC decoding: best class per time step, collapsing repeats and dropping blanks.
    fn decode(&self, scores: ArrayView2<f32>) -> TextLine {
        let mut line = TextLine::default();
        let mut previous = 0;
        for step in scores.outer_iter() {
            let Some((index, score)) = step
                .indexed_iter()
                .max_by_key(|(_, score)| FloatOrd(**score))
                .map(|(index, score)| (index, *score))
            else {
                continue;
            };
            if index != 0 && index != previous && index < self.keys.len() {
                line.text.push_str(&self.keys[index]);
                line.character_scores.push(score);
            }
            previous = index;
        }
        line
    }
}
