use geo::BoundingRect;
use serde::Serialize;

use crate::{Detection, ImageFrame};

/// Axis-aligned extent of a single detection relative to its image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionMetrics {
    pub bbox_width: f64,
    pub bbox_height: f64,
    pub area: f64,
    pub area_ratio: f64,
    pub width_ratio: f64,
}

/// Text statistics over every detection of one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub total_chars: usize,
    pub total_text_area: f64,
    pub total_area_ratio: f64,
    pub max_region_area_ratio: f64,
    pub max_region_width_ratio: f64,
}

/// Measures the axis-aligned bounding box of `detection`.
///
/// Rotated quadrilaterals get the box spanning all of their corners, which
/// overstates the area of slanted text. Returns `None` for degenerate regions
/// (no points, or a box with non-positive area).
pub fn region_metrics(detection: &Detection, frame: ImageFrame) -> Option<RegionMetrics> {
    let rect = detection.region.bounding_rect()?;
    let bbox_width = rect.width();
    let bbox_height = rect.height();
    let area = bbox_width * bbox_height;
    if !(area > 0.0) {
        return None;
    }

    Some(RegionMetrics {
        bbox_width,
        bbox_height,
        area,
        area_ratio: area / frame.area(),
        width_ratio: bbox_width / frame.width() as f64,
    })
}

/// Aggregates region metrics for a whole image.
///
/// Degenerate regions still contribute their text to `total_chars` but are left
/// out of every area statistic.
pub fn compute_metrics(detections: &[Detection], frame: ImageFrame) -> AggregateMetrics {
    let mut metrics = AggregateMetrics {
        total_chars: detections.iter().map(Detection::char_count).sum(),
        ..Default::default()
    };

    for region in detections.iter().filter_map(|it| region_metrics(it, frame)) {
        metrics.total_text_area += region.area;
        metrics.max_region_area_ratio = metrics.max_region_area_ratio.max(region.area_ratio);
        metrics.max_region_width_ratio = metrics.max_region_width_ratio.max(region.width_ratio);
    }
    metrics.total_area_ratio = metrics.total_text_area / frame.area();

    metrics
}
