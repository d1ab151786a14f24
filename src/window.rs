//! Intensity windowing.

use ndarray::ArrayView2;

/// Percentile of `values` with linear interpolation between closest ranks.
///
/// NaN samples are ignored; `None` when nothing is left.
pub fn percentile<'a>(values: impl IntoIterator<Item = &'a f32>, q: f32) -> Option<f32> {
    let mut sorted: Vec<f32> = values.into_iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f32;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Display window: values at or below `min` map to 0, at or above `max` to 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub min: f32,
    pub max: f32,
}

impl Window {
    pub const DEFAULT_LOW_PERCENTILE: f32 = 1.0;
    pub const DEFAULT_HIGH_PERCENTILE: f32 = 99.0;

    /// Build a window, substituting a usable range when the bounds collapse.
    pub fn new(min: f32, max: f32) -> Self {
        if max > min {
            Self { min, max }
        } else {
            Self {
                min,
                max: min + 1.0,
            }
        }
    }

    /// 1st to 99th percentile of the plane.
    ///
    /// Falls back to the plane's full range when the percentiles coincide, and
    /// to `[v, v + 1]` for a constant plane.
    pub fn from_plane(plane: &ArrayView2<f32>) -> Self {
        let low = percentile(plane.iter(), Self::DEFAULT_LOW_PERCENTILE).unwrap_or(0.0);
        let high = percentile(plane.iter(), Self::DEFAULT_HIGH_PERCENTILE).unwrap_or(low);
        if high > low {
            return Self { min: low, max: high };
        }
        let min = percentile(plane.iter(), 0.0).unwrap_or(low);
        let max = percentile(plane.iter(), 100.0).unwrap_or(high);
        Self::new(min, max)
    }

    /// Override either bound, keeping the other from `self`.
    pub fn with_bounds(self, min: Option<f32>, max: Option<f32>) -> Self {
        Self::new(min.unwrap_or(self.min), max.unwrap_or(self.max))
    }

    /// Clip `value` to the window and scale it to `[0, 1]`.
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array2, array};

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [1.0_f32, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(percentile(&values, 0.0).unwrap(), 1.0);
        assert_relative_eq!(percentile(&values, 50.0).unwrap(), 3.0);
        assert_relative_eq!(percentile(&values, 90.0).unwrap(), 4.6, epsilon = 1e-5);
        assert_relative_eq!(percentile(&values, 100.0).unwrap(), 5.0);
        assert!(percentile(&[] as &[f32], 50.0).is_none());
    }

    #[test]
    fn default_window_uses_percentiles() {
        let plane = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f32);
        let window = Window::from_plane(&plane.view());
        assert_relative_eq!(window.min, 0.99, epsilon = 1e-4);
        assert_relative_eq!(window.max, 98.01, epsilon = 1e-4);
    }

    #[test]
    fn collapsed_percentiles_fall_back_to_full_range() {
        let mut plane = Array2::<f32>::zeros((20, 10));
        plane[[0, 0]] = 500.0;
        let window = Window::from_plane(&plane.view());
        assert_eq!(window, Window { min: 0.0, max: 500.0 });
    }

    #[test]
    fn constant_plane_gets_unit_window() {
        let plane = array![[40.0_f32, 40.0], [40.0, 40.0]];
        let window = Window::from_plane(&plane.view());
        assert_eq!(window, Window { min: 40.0, max: 41.0 });
        assert_eq!(window.normalize(40.0), 0.0);
    }

    #[test]
    fn normalize_clips_outside_values() {
        let window = Window::new(-100.0, 100.0);
        assert_eq!(window.normalize(-500.0), 0.0);
        assert_eq!(window.normalize(0.0), 0.5);
        assert_eq!(window.normalize(500.0), 1.0);
    }
}
