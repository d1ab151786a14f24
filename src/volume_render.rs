//! Direct volume rendering on the CPU.
//!
//! Orthographic rays run front to back along one anatomical axis. Each sample
//! is coloured through a colormap and weighted by an opacity transfer
//! function. Label surfaces are the marching-cubes meshes also written as
//! STL; they are projected into the view and composited as translucent
//! layers where a ray passes through them.

use crate::{
    colormap::{Colormap, categorical},
    enums::Orientation,
    isosurface::{self, IsoSurfaceError},
    volume::Volume,
    window::percentile,
};

use image::{ImageBuffer, Rgba, RgbaImage, imageops};
use log::{debug, info};
use ndarray::{Array3, Zip};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeRenderError {
    #[error("Volume shapes differ: {first:?} vs {second:?}")]
    ShapeMismatch {
        first: (usize, usize, usize),
        second: (usize, usize, usize),
    },

    #[error("Cannot render an empty volume")]
    Empty,

    #[error(transparent)]
    Surface(#[from] IsoSurfaceError),
}

/// Maps a normalized sample in `[0, 1]` to an opacity in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpacityTransfer {
    /// Logistic ramp centred at 0.5 with the given steepness, rescaled so
    /// that 0 and 1 map exactly to 0 and 1.
    Sigmoid(f32),
    Linear,
}

impl OpacityTransfer {
    /// The fixed transfer function used for CT volumes.
    pub const CT: OpacityTransfer = OpacityTransfer::Sigmoid(9.0);

    pub fn opacity(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match *self {
            OpacityTransfer::Sigmoid(k) => {
                let logistic = |x: f32| 1.0 / (1.0 + (-k * (x - 0.5)).exp());
                let (lo, hi) = (logistic(0.0), logistic(1.0));
                ((logistic(t) - lo) / (hi - lo)).clamp(0.0, 1.0)
            }
            OpacityTransfer::Linear => t,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Rays travel along this orientation's axis, from index 0 onwards.
    pub view: Orientation,
    pub colormap: Colormap,
    pub transfer: OpacityTransfer,
    /// Opacity of label surfaces.
    pub surface_opacity: f32,
    /// Distance in voxels over which a sample's opacity applies in full.
    /// Derived from the volume size when `None`.
    pub opacity_unit_distance: Option<f32>,
    pub background: [u8; 3],
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            view: Orientation::Coronal,
            colormap: Colormap::Bone,
            transfer: OpacityTransfer::CT,
            surface_opacity: 0.4,
            opacity_unit_distance: None,
            background: [76, 76, 76],
        }
    }
}

/// Thresholded difference between two volumes.
#[derive(Clone, Debug)]
pub struct DifferenceVolume {
    /// `second - first`, zeroed where the absolute change is below `threshold`.
    pub data: Array3<f32>,
    pub threshold: f32,
    /// Largest absolute difference kept.
    pub abs_max: f32,
}

impl DifferenceVolume {
    /// Keep only changes at or above the `significance` percentile of `|second - first|`.
    pub fn compute(
        first: &Volume,
        second: &Volume,
        significance: f32,
    ) -> Result<Self, VolumeRenderError> {
        let mut data = first
            .difference(second)
            .ok_or(VolumeRenderError::ShapeMismatch {
                first: first.dim(),
                second: second.dim(),
            })?;
        let magnitudes = data.mapv(f32::abs);
        let threshold =
            percentile(magnitudes.iter(), significance).ok_or(VolumeRenderError::Empty)?;

        Zip::from(&mut data)
            .and(&magnitudes)
            .par_for_each(|d, &m| {
                if m < threshold {
                    *d = 0.0;
                }
            });
        let abs_max = data.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()));
        info!(
            "Difference threshold {:.3}, max absolute difference {:.3}",
            threshold, abs_max
        );

        Ok(Self {
            data,
            threshold,
            abs_max,
        })
    }
}

struct Layer<'a> {
    data: &'a Array3<f32>,
    colormap: Colormap,
    transfer: OpacityTransfer,
    low: f32,
    high: f32,
}

impl Layer<'_> {
    #[inline]
    fn sample(&self, index: [usize; 3]) -> ([f32; 3], f32) {
        let t = (self.data[index] - self.low) / (self.high - self.low);
        (self.colormap.rgb(t), self.transfer.opacity(t))
    }
}

/// Where a ray passes through a label surface.
#[derive(Clone, Copy, Debug)]
struct Fragment {
    /// Position along the ray, in samples.
    depth: f32,
    label: u32,
    rgb: [f32; 3],
}

/// Label surface fragments per image pixel, nearest first.
struct Surfaces {
    width: usize,
    height: usize,
    fragments: Vec<Vec<Fragment>>,
}

impl Surfaces {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            fragments: vec![Vec::new(); width * height],
        }
    }

    fn at(&self, u: usize, v: usize) -> &[Fragment] {
        &self.fragments[v * self.width + u]
    }

    /// Add a fragment at every pixel centre covered by a triangle given in
    /// image coordinates (u, v, depth).
    fn rasterize(&mut self, [a, b, c]: [[f32; 3]; 3], label: u32, rgb: [f32; 3]) {
        const EPSILON: f32 = 1e-5;

        let area = edge(a, b, [c[0], c[1]]);
        if area.abs() < EPSILON {
            // Seen edge-on.
            return;
        }
        let range = |axis: usize, len: usize| {
            let lo = a[axis].min(b[axis]).min(c[axis]).ceil().max(0.0);
            let hi = a[axis].max(b[axis]).max(c[axis]).floor();
            if hi < 0.0 {
                return 0..0;
            }
            lo as usize..(hi as usize + 1).min(len)
        };

        for v in range(1, self.height) {
            for u in range(0, self.width) {
                let p = [u as f32, v as f32];
                let w = [edge(b, c, p), edge(c, a, p), edge(a, b, p)].map(|e| e / area);
                if w.iter().all(|&w| w >= -EPSILON) {
                    let depth = w[0] * a[2] + w[1] * b[2] + w[2] * c[2];
                    self.fragments[v * self.width + u].push(Fragment { depth, label, rgb });
                }
            }
        }
    }

    /// Sort fragments front to back and merge the ones produced twice where
    /// a pixel centre falls on an edge shared by two triangles.
    fn finish(&mut self) {
        self.fragments.par_iter_mut().for_each(|fragments| {
            fragments.sort_by(|x, y| x.depth.total_cmp(&y.depth));
            fragments.dedup_by(|x, y| x.label == y.label && (x.depth - y.depth).abs() < 1e-3);
        });
    }
}

/// Twice the signed area of (a, b, p) in the image plane.
#[inline]
fn edge(a: [f32; 3], b: [f32; 3], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Front-to-back accumulation along one ray.
#[derive(Default)]
struct Ray {
    color: [f32; 3],
    alpha: f32,
}

impl Ray {
    #[inline]
    fn composite(&mut self, rgb: [f32; 3], a: f32) {
        let weight = (1.0 - self.alpha) * a;
        for (c, value) in self.color.iter_mut().zip(rgb) {
            *c += weight * value;
        }
        self.alpha += weight;
    }

    fn is_saturated(&self) -> bool {
        self.alpha >= 0.995
    }

    fn over(&self, background: [f32; 3]) -> [u8; 4] {
        let mut out = [255u8; 4];
        for c in 0..3 {
            let value = self.color[c] + (1.0 - self.alpha) * background[c];
            out[c] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        out
    }
}

pub struct VolumeRenderer {
    options: RenderOptions,
}

impl VolumeRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Render a CT volume with the surfaces of every label present in `labels`.
    pub fn render(
        &self,
        ct: &Volume,
        labels: Option<&Volume>,
    ) -> Result<RgbaImage, VolumeRenderError> {
        let layer = self.ct_layer(ct);
        let surfaces = labels.map(|labels| self.surfaces(ct, labels)).transpose()?;
        self.cast(ct.dim(), &[layer], surfaces.as_ref())
    }

    /// Render two volumes from the same viewpoint, left and right.
    pub fn render_comparison(
        &self,
        left: (&Volume, Option<&Volume>),
        right: (&Volume, Option<&Volume>),
    ) -> Result<RgbaImage, VolumeRenderError> {
        let left = self.render(left.0, left.1)?;
        let right = self.render(right.0, right.1)?;

        let mut canvas = RgbaImage::from_pixel(
            left.width() + right.width(),
            left.height().max(right.height()),
            self.background_pixel(),
        );
        imageops::replace(&mut canvas, &left, 0, 0);
        imageops::replace(&mut canvas, &right, i64::from(left.width()), 0);
        Ok(canvas)
    }

    /// Render `base` with significant differences overlaid on a diverging map
    /// centred at zero.
    pub fn render_difference(
        &self,
        base: &Volume,
        difference: &DifferenceVolume,
    ) -> Result<RgbaImage, VolumeRenderError> {
        if difference.data.dim() != base.dim() {
            return Err(VolumeRenderError::ShapeMismatch {
                first: base.dim(),
                second: difference.data.dim(),
            });
        }

        let mut layers = Vec::with_capacity(2);
        if difference.abs_max > 0.0 {
            layers.push(Layer {
                data: &difference.data,
                colormap: Colormap::Coolwarm,
                transfer: OpacityTransfer::Linear,
                low: -difference.abs_max,
                high: difference.abs_max,
            });
        }
        layers.push(self.ct_layer(base));
        self.cast(base.dim(), &layers, None)
    }

    fn ct_layer<'a>(&self, ct: &'a Volume) -> Layer<'a> {
        let (low, high) = ct.value_range();
        Layer {
            data: &ct.data,
            colormap: self.options.colormap,
            transfer: self.options.transfer,
            low,
            high: if high > low { high } else { low + 1.0 },
        }
    }

    /// Project the surface mesh of every present label into the view.
    fn surfaces(&self, ct: &Volume, labels: &Volume) -> Result<Surfaces, VolumeRenderError> {
        if labels.dim() != ct.dim() {
            return Err(VolumeRenderError::ShapeMismatch {
                first: ct.dim(),
                second: labels.dim(),
            });
        }
        let dim = labels.dim();
        let (width, height) = self.output_dimensions(dim);
        let mut surfaces = Surfaces::new(width, height);

        for (i, label) in labels.present_labels().into_iter().enumerate() {
            let rgb = categorical(i).map(|c| c as f32 / 255.0);
            let mesh = isosurface::extract_label_surface(labels, label, [1.0; 3])?;
            debug!("Label {} surface: {} triangles", label, mesh.triangle_count());
            for triangle in &mesh.triangles {
                let corners = triangle.map(|index| self.project(dim, mesh.vertices[index]));
                surfaces.rasterize(corners, label, rgb);
            }
        }
        surfaces.finish();
        Ok(surfaces)
    }

    fn background_pixel(&self) -> Rgba<u8> {
        let [r, g, b] = self.options.background;
        Rgba([r, g, b, 255])
    }

    /// Image width and height for the current view.
    pub fn output_dimensions(&self, dim: (usize, usize, usize)) -> (usize, usize) {
        let (depth, height, width) = dim;
        match self.options.view {
            Orientation::Axial => (width, height),
            Orientation::Coronal => (width, depth),
            Orientation::Sagittal => (height, depth),
        }
    }

    /// Volume index of ray sample `k` through image column `u`, row `v`.
    /// Vertical image axes point up.
    #[inline]
    fn voxel(&self, dim: (usize, usize, usize), u: usize, v: usize, k: usize) -> [usize; 3] {
        let (depth, height, _) = dim;
        match self.options.view {
            Orientation::Axial => [k, height - 1 - v, u],
            Orientation::Coronal => [depth - 1 - v, k, u],
            Orientation::Sagittal => [depth - 1 - v, u, k],
        }
    }

    /// Image position (u, v) and ray depth of a point given in voxel
    /// coordinates (x, y, z); the inverse of [`Self::voxel`].
    #[inline]
    fn project(&self, dim: (usize, usize, usize), [x, y, z]: [f32; 3]) -> [f32; 3] {
        let (depth, height, _) = dim;
        let (top_z, top_y) = ((depth - 1) as f32, (height - 1) as f32);
        match self.options.view {
            Orientation::Axial => [x, top_y - y, z],
            Orientation::Coronal => [x, top_z - z, y],
            Orientation::Sagittal => [y, top_z - z, x],
        }
    }

    fn unit_distance(&self, dim: (usize, usize, usize)) -> f32 {
        self.options.opacity_unit_distance.unwrap_or_else(|| {
            let (d, h, w) = (dim.0 as f32, dim.1 as f32, dim.2 as f32);
            let diagonal = (d * d + h * h + w * w).sqrt();
            let mean = (d + h + w) / 3.0;
            if mean > 1.0 { diagonal / (mean - 1.0) } else { 1.0 }
        })
    }

    fn cast(
        &self,
        dim: (usize, usize, usize),
        layers: &[Layer<'_>],
        surfaces: Option<&Surfaces>,
    ) -> Result<RgbaImage, VolumeRenderError> {
        if dim.0 == 0 || dim.1 == 0 || dim.2 == 0 {
            return Err(VolumeRenderError::Empty);
        }
        let (width, height) = self.output_dimensions(dim);
        let steps = match self.options.view {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        let exponent = 1.0 / self.unit_distance(dim);
        let surface_alpha = self.options.surface_opacity.clamp(0.0, 1.0);
        let background = self.options.background.map(|c| c as f32 / 255.0);

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|v| {
                (0..width).flat_map(move |u| {
                    let mut ray = Ray::default();
                    let fragments = surfaces.map_or(&[][..], |surfaces| surfaces.at(u, v));
                    let mut next = 0;

                    for k in 0..steps {
                        let index = self.voxel(dim, u, v, k);

                        while let Some(fragment) =
                            fragments.get(next).filter(|f| f.depth <= k as f32)
                        {
                            ray.composite(fragment.rgb, surface_alpha);
                            next += 1;
                        }

                        for layer in layers {
                            let (rgb, a) = layer.sample(index);
                            if a > 0.0 {
                                ray.composite(rgb, 1.0 - (1.0 - a).powf(exponent));
                            }
                        }
                        if ray.is_saturated() {
                            break;
                        }
                    }

                    if !ray.is_saturated() {
                        for fragment in &fragments[next..] {
                            ray.composite(fragment.rgb, surface_alpha);
                        }
                    }
                    ray.over(background)
                })
            })
            .collect();

        ImageBuffer::from_raw(width as u32, height as u32, pixel_data).ok_or(VolumeRenderError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube(size: usize, fill: f32) -> Volume {
        Volume::new(Array3::from_elem((size, size, size), fill))
    }

    #[test]
    fn sigmoid_transfer_spans_zero_to_one() {
        let tf = OpacityTransfer::CT;
        assert_relative_eq!(tf.opacity(0.0), 0.0);
        assert_relative_eq!(tf.opacity(1.0), 1.0);
        assert_relative_eq!(tf.opacity(0.5), 0.5, epsilon = 1e-6);
        assert!(tf.opacity(0.2) < tf.opacity(0.3));
        assert_relative_eq!(OpacityTransfer::Linear.opacity(0.25), 0.25);
    }

    #[test]
    fn transparent_volume_shows_background() {
        let ct = cube(4, 0.0);
        let renderer = VolumeRenderer::new(RenderOptions {
            background: [10, 20, 30],
            ..Default::default()
        });
        let image = renderer.render(&ct, None).unwrap();
        assert!(image.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn output_size_follows_view() {
        let ct = Volume::new(Array3::zeros((2, 3, 4)));
        for (view, expected) in [
            (Orientation::Axial, (4, 3)),
            (Orientation::Coronal, (4, 2)),
            (Orientation::Sagittal, (3, 2)),
        ] {
            let renderer = VolumeRenderer::new(RenderOptions {
                view,
                ..Default::default()
            });
            let image = renderer.render(&ct, None).unwrap();
            assert_eq!(image.dimensions(), (expected.0 as u32, expected.1 as u32));
        }
    }

    #[test]
    fn dense_voxels_are_opaque() {
        let mut ct = cube(8, 0.0);
        ct.data[[4, 4, 4]] = 1000.0;
        ct.data.slice_mut(ndarray::s![.., .., 0..2]).fill(1000.0);
        let renderer = VolumeRenderer::new(RenderOptions {
            view: Orientation::Sagittal,
            opacity_unit_distance: Some(1.0),
            ..Default::default()
        });
        let image = renderer.render(&ct, None).unwrap();
        // Every ray along X hits the bright wall first, which is white in bone.
        assert!(image.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[test]
    fn label_surfaces_tint_rays_that_cross_them() {
        let ct = cube(6, 0.0);
        let mut labels = cube(6, 0.0);
        labels.data.slice_mut(ndarray::s![2..4, 2..4, 2..4]).fill(5.0);
        let renderer = VolumeRenderer::new(RenderOptions {
            view: Orientation::Axial,
            background: [0, 0, 0],
            ..Default::default()
        });

        let image = renderer.render(&ct, Some(&labels)).unwrap();
        // Image row r shows y = 5 - r.
        let hit = image.get_pixel(2, 3).0;
        let miss = image.get_pixel(0, 0).0;
        assert_eq!(miss, [0, 0, 0, 255]);
        assert!(hit[0] > 0 && hit[2] > hit[0], "first palette colour is blue: {hit:?}");
    }

    #[test]
    fn tinted_pixels_match_the_surface_mesh_footprint() {
        let ct = cube(6, 0.0);
        let mut labels = cube(6, 0.0);
        labels.data.slice_mut(ndarray::s![2..4, 2..4, 2..4]).fill(5.0);
        let mesh = isosurface::extract_label_surface(&labels, 5, [1.0; 3]).unwrap();
        // The same mesh that is written as STL encloses voxels 2..4 half a voxel out.
        let (lo, hi) = mesh.bounds().unwrap();
        for i in 0..3 {
            assert_relative_eq!(lo[i], 1.5, epsilon = 1e-4);
            assert_relative_eq!(hi[i], 3.5, epsilon = 1e-4);
        }

        for view in [Orientation::Axial, Orientation::Coronal, Orientation::Sagittal] {
            let renderer = VolumeRenderer::new(RenderOptions {
                view,
                background: [0, 0, 0],
                ..Default::default()
            });
            let image = renderer.render(&ct, Some(&labels)).unwrap();
            for (u, v, pixel) in image.enumerate_pixels() {
                // Only pixel centres 2 and 3 fall inside the 1.5..3.5 footprint.
                let covered = (2..=3).contains(&u) && (2..=3).contains(&v);
                let tinted = pixel.0 != [0, 0, 0, 255];
                assert_eq!(tinted, covered, "{view:?} pixel ({u}, {v})");
            }
        }
    }

    #[test]
    fn difference_keeps_only_significant_changes() {
        let first = cube(4, 0.0);
        let mut second = cube(4, 0.0);
        second.data[[0, 0, 0]] = 50.0;
        second.data[[1, 1, 1]] = -80.0;
        second.data[[2, 2, 2]] = 1.0;

        let diff = DifferenceVolume::compute(&first, &second, 98.0).unwrap();
        assert_eq!(diff.data[[0, 0, 0]], 50.0);
        assert_eq!(diff.data[[1, 1, 1]], -80.0);
        assert_eq!(diff.data[[2, 2, 2]], 0.0);
        assert_eq!(diff.abs_max, 80.0);

        let renderer = VolumeRenderer::new(RenderOptions::default());
        let image = renderer.render_difference(&first, &diff).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
    }

    #[test]
    fn difference_requires_matching_shapes() {
        let err = DifferenceVolume::compute(&cube(2, 0.0), &cube(3, 0.0), 95.0).unwrap_err();
        assert!(matches!(err, VolumeRenderError::ShapeMismatch { .. }));
    }

    #[test]
    fn comparison_places_volumes_side_by_side() {
        let renderer = VolumeRenderer::new(RenderOptions {
            view: Orientation::Axial,
            ..Default::default()
        });
        let left = Volume::new(Array3::zeros((2, 3, 4)));
        let right = Volume::new(Array3::zeros((2, 5, 6)));
        let image = renderer
            .render_comparison((&left, None), (&right, None))
            .unwrap();
        assert_eq!(image.dimensions(), (10, 5));
    }
}
