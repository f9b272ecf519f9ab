use std::path::Path;

use geo::{Coord, MinimumRotatedRect, Polygon, Scale as _};
use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use imageproc::{
    contours::find_contours,
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use ndarray::{ArrayView2, Axis, Ix4};
use ort::{inputs, Session};
use tracing::instrument;

use super::{
    session::{load_session, SessionOptions},
    util::{
        box_score, detector_scale, max_side, normalize_chw, to_geo_poly, to_luma_image, unclip,
        Scale,
    },
};
use crate::OcrError;

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const MAX_CANDIDATES: usize = 1000;
const MIN_SIDE: f32 = 3.0;

/// Knobs of the probability map post-processing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxOptions {
    pub max_side_len: u32,
    /// Binarization threshold for the probability map.
    pub box_threshold: f32,
    /// Minimum mean probability inside a candidate box.
    pub box_score_threshold: f32,
    pub unclip_ratio: f32,
}

/// A located, not yet recognized, text region in source image coordinates.
#[derive(Debug, Clone)]
pub(crate) struct TextBox {
    pub score: f32,
    pub rect: Polygon<f32>,
}

/// DB-style text region detector.
pub(crate) struct TextDetector {
    session: Session,
}

impl TextDetector {
    pub fn load(path: &Path, options: &SessionOptions) -> Result<Self, OcrError> {
        Ok(Self {
            session: load_session(path, options)?,
        })
    }

    #[instrument(
        level = "debug",
        skip(self, image),
        fields(width = image.width(), height = image.height())
    )]
    pub fn detect(&self, image: &RgbImage, options: &BoxOptions) -> Result<Vec<TextBox>, OcrError> {
        let scale = detector_scale(image.width(), image.height(), options.max_side_len);
        let resized = imageops::resize(
            image,
            scale.target_width,
            scale.target_height,
            FilterType::Triangle,
        );
        let input = normalize_chw(&resized, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));

        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or(OcrError::MissingOutput { stage: "detect" })?;
        let pred = output
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix4>()
            .map_err(|source| OcrError::Shape {
                stage: "detect",
                source,
            })?;
        // [batch, channel, height, width]
        let pred = pred.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0);

        let mut mask = to_luma_image(pred).ok_or(OcrError::MissingOutput {
            stage: "detect mask",
        })?;
        threshold_mut(
            &mut mask,
            (options.box_threshold * 255.0) as u8,
            ThresholdType::Binary,
        );
        dilate_mut(&mut mask, Norm::L1, 2);

        Ok(extract_boxes(pred, &mask, scale, options))
    }
}

#[instrument(level = "trace", skip(pred, mask))]
fn extract_boxes(
    pred: ArrayView2<f32>,
    mask: &GrayImage,
    scale: Scale,
    options: &BoxOptions,
) -> Vec<TextBox> {
    find_contours::<i32>(mask)
        .into_iter()
        .take(MAX_CANDIDATES)
        .filter(|contour| contour.points.len() > 2)
        .filter_map(|contour| to_geo_poly(&contour.points).minimum_rotated_rect())
        .filter(|rect| max_side(rect) >= MIN_SIDE)
        .map(|rect| {
            let score = box_score(&rect, pred);
            (rect, score)
        })
        .filter(|(_, score)| *score >= options.box_score_threshold)
        .filter_map(|(rect, score)| Some((unclip(&rect, options.unclip_ratio)?, score)))
        .filter(|(rect, _)| max_side(rect) >= MIN_SIDE + 2.0)
        .map(|(rect, score)| TextBox {
            score,
            rect: rect.scale_around_point(scale.factor_x, scale.factor_y, Coord::zero()),
        })
        .collect()
}
