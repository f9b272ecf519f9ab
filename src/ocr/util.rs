use geo::{
    point, Area, BoundingRect, Contains, Coord, EuclideanLength, HasDimensions, LineString,
    MinimumRotatedRect, Polygon, Translate,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{imageops, GrayImage, ImageBuffer, RgbImage};
use imageproc::point::Point;
use ndarray::{s, Array3, ArrayView2, Axis};
use tracing::instrument;

/// Converts `image` into a CHW tensor of `(pixel / 255 - mean) / std`.
///
/// `norm_vals` holds the reciprocal of the standard deviation.
#[instrument(level = "trace", skip(image))]
pub(crate) fn normalize_chw(
    image: &RgbImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| {
            let value = image.get_pixel(x as u32, y as u32).0[ch] as f32 / 255.0;
            (value - mean_vals[ch]) * norm_vals[ch]
        },
    )
}

/// Renders a probability map in `[0, 1]` as a grayscale image.
pub(crate) fn to_luma_image(data: ArrayView2<f32>) -> Option<GrayImage> {
    let height = data.len_of(Axis(0));
    let width = data.len_of(Axis(1));
    let pixels = data
        .iter()
        .map(|p| (p.clamp(0.0, 1.0) * 255.0) as u8)
        .collect::<Vec<u8>>();
    ImageBuffer::from_raw(width as u32, height as u32, pixels)
}

pub(crate) fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let coords = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(coords), vec![])
}

/// Length of the longest edge of `rect`.
pub(crate) fn max_side(rect: &Polygon<f32>) -> f32 {
    rect.exterior()
        .lines()
        .map(|line| line.euclidean_length())
        .fold(0.0, f32::max)
}

/// Mean probability of the map cells covered by `rect`.
pub(crate) fn box_score(rect: &Polygon<f32>, pred: ArrayView2<f32>) -> f32 {
    let Some(bounds) = rect.bounding_rect() else {
        return 0.0;
    };
    let (rows, cols) = pred.dim();
    let min_x = (bounds.min().x.max(0.0) as usize).min(cols);
    let min_y = (bounds.min().y.max(0.0) as usize).min(rows);
    let max_x = (bounds.max().x.ceil().max(0.0) as usize).clamp(min_x, cols);
    let max_y = (bounds.max().y.ceil().max(0.0) as usize).clamp(min_y, rows);

    let window = pred.slice(s![min_y..max_y, min_x..max_x]);
    let local = rect.translate(-(min_x as f32), -(min_y as f32));

    let (sum, count) = window
        .indexed_iter()
        .filter(|((y, x), _)| local.contains(&point! { x: *x as f32, y: *y as f32 }))
        .fold((0.0f32, 0usize), |(sum, count), (_, value)| {
            (sum + value, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Grows a shrunk text kernel back to the full text extent.
pub(crate) fn unclip(rect: &Polygon<f32>, unclip_ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = rect.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = rect.unsigned_area() * unclip_ratio / perimeter;
    let grown = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);
    if grown.is_empty() {
        None
    } else {
        grown.minimum_rotated_rect()
    }
}

/// Resize plan for feeding an image to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scale {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

/// Fits the longer side within `max_side_len` and floors both sides to a
/// multiple of 32, as the detector requires.
pub(crate) fn detector_scale(width: u32, height: u32, max_side_len: u32) -> Scale {
    let aspect_ratio = width as f32 / height as f32;
    let (target_width, target_height) = if aspect_ratio >= 1.0 {
        let w = width.min(max_side_len);
        (w, (w as f32 / aspect_ratio) as u32)
    } else {
        let h = height.min(max_side_len);
        ((h as f32 * aspect_ratio) as u32, h)
    };
    let target_width = (target_width / 32 * 32).max(32);
    let target_height = (target_height / 32 * 32).max(32);
    log::trace!("detector input {width}x{height} -> {target_width}x{target_height}");

    Scale {
        factor_x: width as f32 / target_width as f32,
        factor_y: height as f32 / target_height as f32,
        target_width,
        target_height,
    }
}

/// Crops the bounding rectangle of `region` out of `image`, clamped to its bounds.
pub(crate) fn crop_region(image: &RgbImage, region: &Polygon<f32>) -> Option<RgbImage> {
    let rect = region.bounding_rect()?;
    let x = (rect.min().x.max(0.0) as u32).min(image.width());
    let y = (rect.min().y.max(0.0) as u32).min(image.height());
    let width = (rect.width().max(0.0) as u32).min(image.width() - x);
    let height = (rect.height().max(0.0) as u32).min(image.height() - y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(imageops::crop_imm(image, x, y, width, height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_floors_to_multiples_of_32() {
        let scale = detector_scale(1000, 500, 2048);
        assert_eq!(scale.target_width, 992);
        assert_eq!(scale.target_height, 480);
        assert!((scale.factor_x - 1000.0 / 992.0).abs() < 1e-6);
    }

    #[test]
    fn scale_limits_long_side() {
        let scale = detector_scale(600, 3000, 1024);
        assert_eq!(scale.target_height, 1024);
        assert_eq!(scale.target_width, 192);
    }

    #[test]
    fn tiny_images_get_minimum_size() {
        let scale = detector_scale(10, 10, 1024);
        assert_eq!((scale.target_width, scale.target_height), (32, 32));
    }

    #[test]
    fn crop_is_clamped() {
        let image = RgbImage::new(50, 40);
        let region = Polygon::new(
            LineString::from(vec![(40.0f32, 30.0), (80.0, 30.0), (80.0, 60.0), (40.0, 60.0)]),
            vec![],
        );
        let crop = crop_region(&image, &region).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));
    }

    #[test]
    fn box_score_averages_inside_cells() {
        let pred = ndarray::Array2::<f32>::from_elem((10, 10), 0.5);
        let rect = Polygon::new(
            LineString::from(vec![(1.0f32, 1.0), (8.0, 1.0), (8.0, 8.0), (1.0, 8.0)]),
            vec![],
        );
        assert!((box_score(&rect, pred.view()) - 0.5).abs() < 1e-6);
    }
}
