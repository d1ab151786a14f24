//! 2D slice rendering with windowing and mask overlay.
//!
//! Planes are drawn transposed with the origin at the bottom-left, so axial
//! planes appear with X to the right and Y upwards.

use crate::{colormap::Colormap, window::Window};

use image::{ImageBuffer, Rgba, RgbaImage};
use ndarray::ArrayView2;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Mask plane {mask:?} does not match CT plane {plane:?}")]
    ShapeMismatch {
        plane: (usize, usize),
        mask: (usize, usize),
    },

    #[error("Cannot render an empty plane")]
    Empty,
}

/// Binary mask drawn over the CT plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Overlay {
    /// Opacity in `[0, 1]`.
    pub alpha: f32,
    /// Draw only this label; every non-zero label when `None`.
    pub label: Option<u32>,
    pub color: [u8; 3],
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            label: None,
            color: [255, 0, 0],
        }
    }
}

impl Overlay {
    #[inline]
    fn covers(&self, value: f32) -> bool {
        match self.label {
            Some(label) => value >= 1.0 && value.round() as u32 == label,
            None => value > 0.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SliceOptions {
    pub colormap: Colormap,
    /// Lower window bound; the plane's 1st percentile when `None`.
    pub vmin: Option<f32>,
    /// Upper window bound; the plane's 99th percentile when `None`.
    pub vmax: Option<f32>,
    pub overlay: Option<Overlay>,
}

impl SliceOptions {
    pub fn window_for(&self, plane: &ArrayView2<f32>) -> Window {
        Window::from_plane(plane).with_bounds(self.vmin, self.vmax)
    }
}

/// Render a CT plane, optionally with a mask plane of the same shape on top.
pub fn render_slice(
    plane: &ArrayView2<f32>,
    mask: Option<&ArrayView2<f32>>,
    options: &SliceOptions,
) -> Result<RgbaImage, RenderError> {
    let (n0, n1) = plane.dim();
    if n0 == 0 || n1 == 0 {
        return Err(RenderError::Empty);
    }
    if let Some(mask) = mask {
        if mask.dim() != plane.dim() {
            return Err(RenderError::ShapeMismatch {
                plane: plane.dim(),
                mask: mask.dim(),
            });
        }
    }

    let window = options.window_for(plane);
    let overlay = options.overlay.filter(|_| mask.is_some());
    let (width, height) = (n0, n1);

    let pixel_data: Vec<u8> = (0..height)
        .into_par_iter()
        .flat_map_iter(|row| {
            let j = height - 1 - row;
            (0..width).flat_map(move |i| {
                let [r, g, b] = options.colormap.rgb8(window.normalize(plane[[i, j]]));
                let mut rgb = [r, g, b];
                if let (Some(overlay), Some(mask)) = (overlay, mask) {
                    if overlay.covers(mask[[i, j]]) {
                        rgb = blend(rgb, overlay.color, overlay.alpha);
                    }
                }
                [rgb[0], rgb[1], rgb[2], 255]
            })
        })
        .collect();

    ImageBuffer::<Rgba<u8>, _>::from_raw(width as u32, height as u32, pixel_data)
        .ok_or(RenderError::Empty)
}

#[inline]
pub(crate) fn blend(base: [u8; 3], color: [u8; 3], alpha: f32) -> [u8; 3] {
    let alpha = alpha.clamp(0.0, 1.0);
    [0, 1, 2].map(|c| {
        (base[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha).round() as u8
    })
}
