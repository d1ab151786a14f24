//! Contour to label-mask rasterization.

use crate::{
    enums::CoordinateMapping, structure_set::RoiContour, volume_loader::SliceGeometry,
};

use image::{GrayImage, Luma};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use log::warn;
use ndarray::Array2;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RasterError {
    #[error("Contour has a degenerate {axis} range ({value})")]
    DegenerateRange { axis: char, value: f64 },
}

/// A pixel position as (column, row).
pub type Pixel = (i64, i64);

/// Convert patient coordinates to pixel coordinates on a `grid` x `grid` image.
///
/// The column comes from x and the column spacing, the row from y and the row
/// spacing. Results are rounded half to even and clipped to the grid.
pub fn patient_to_pixel(
    points: &[[f64; 3]],
    image_position: &[f64; 3],
    pixel_spacing: &[f64; 2],
    grid: usize,
) -> Vec<Pixel> {
    let max = grid.saturating_sub(1) as f64;
    points
        .iter()
        .map(|p| {
            let col = (p[0] - image_position[0]) / pixel_spacing[1];
            let row = (p[1] - image_position[1]) / pixel_spacing[0];
            (
                col.round_ties_even().clamp(0.0, max) as i64,
                row.round_ties_even().clamp(0.0, max) as i64,
            )
        })
        .collect()
}

/// Stretch a contour independently along x and y so it spans the whole grid.
pub fn normalize_min_max(points: &[[f64; 3]], grid: usize) -> Result<Vec<Pixel>, RasterError> {
    let max = grid.saturating_sub(1) as f64;
    let (x_min, x_max) = bounds(points.iter().map(|p| p[0]));
    let (y_min, y_max) = bounds(points.iter().map(|p| p[1]));
    if x_max <= x_min {
        return Err(RasterError::DegenerateRange {
            axis: 'x',
            value: x_min,
        });
    }
    if y_max <= y_min {
        return Err(RasterError::DegenerateRange {
            axis: 'y',
            value: y_min,
        });
    }

    Ok(points
        .iter()
        .map(|p| {
            let col = (p[0] - x_min) / (x_max - x_min) * max;
            let row = (p[1] - y_min) / (y_max - y_min) * max;
            (col.round_ties_even() as i64, row.round_ties_even() as i64)
        })
        .collect())
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Fill a closed polygon into `canvas` with `value`.
///
/// Both the interior and the outline are set, so a polygon through pixel
/// centres covers its corner pixels too. Pixels outside the canvas are ignored.
pub fn fill_polygon(canvas: &mut GrayImage, polygon: &[Pixel], value: u8) {
    let mut points: Vec<Point<i32>> = polygon
        .iter()
        .map(|&(col, row)| Point::new(col as i32, row as i32))
        .collect();
    points.dedup();
    // The outline is closed implicitly.
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    match points.as_slice() {
        [] => {}
        [p] => {
            if let (Ok(x), Ok(y)) = (u32::try_from(p.x), u32::try_from(p.y)) {
                if let Some(pixel) = canvas.get_pixel_mut_checked(x, y) {
                    *pixel = Luma([value]);
                }
            }
        }
        _ => draw_polygon_mut(canvas, &points, Luma([value])),
    }
}

/// Rasterize every contour drawn on one CT slice into a `grid` x `grid` label mask.
///
/// Contours are filled in order, so a later contour overwrites an earlier one
/// where they overlap.
pub fn rasterize_slice(
    contours: &[RoiContour],
    geometry: &SliceGeometry,
    mapping: CoordinateMapping,
    grid: usize,
) -> Result<Array2<u8>, RasterError> {
    let mut canvas = GrayImage::new(grid as u32, grid as u32);

    for contour in contours {
        if contour.points.len() < 3 {
            warn!(
                "Skipping contour of {} on {}: {} points",
                contour.roi_name,
                geometry.sop_instance_uid,
                contour.points.len()
            );
            continue;
        }
        let polygon = match mapping {
            CoordinateMapping::PatientSpacing => patient_to_pixel(
                &contour.points,
                &geometry.image_position,
                &geometry.pixel_spacing,
                grid,
            ),
            CoordinateMapping::MinMax => normalize_min_max(&contour.points, grid)?,
        };
        fill_polygon(&mut canvas, &polygon, contour.roi_code);
    }

    Ok(Array2::from_shape_fn((grid, grid), |(row, col)| {
        canvas.get_pixel(col as u32, row as u32)[0]
    }))
}
