use crate::enums::Orientation;

use ndarray::{Array3, ArrayView2, Zip, s};
use std::collections::BTreeSet;

/// A scalar volume with axes (depth, height, width), i.e. (Z, Y, X).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
}

impl Volume {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Number of planes available along an orientation
    pub fn axis_len(&self, orientation: Orientation) -> usize {
        self.data.len_of(ndarray::Axis(orientation.axis()))
    }

    pub fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        index < self.axis_len(orientation)
    }

    /// View of the plane at `index` along `orientation`; `None` when out of range.
    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    /// Smallest and largest sample, ignoring NaN. `(0, 0)` for an empty volume.
    pub fn value_range(&self) -> (f32, f32) {
        let (lo, hi) = self
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if lo > hi { (0.0, 0.0) } else { (lo, hi) }
    }

    /// Distinct positive integer labels, ascending.
    pub fn present_labels(&self) -> Vec<u32> {
        self.data
            .iter()
            .filter(|&&v| v >= 1.0)
            .map(|&v| v.round() as u32)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 1.0 where the volume equals `label`, 0.0 elsewhere.
    pub fn indicator(&self, label: u32) -> Array3<f32> {
        self.data
            .mapv(|v| if v.round() as u32 == label && v >= 1.0 { 1.0 } else { 0.0 })
    }

    /// Per-voxel `other - self`; `None` when shapes differ.
    pub fn difference(&self, other: &Volume) -> Option<Array3<f32>> {
        if self.dim() != other.dim() {
            return None;
        }
        let mut diff = Array3::zeros(self.dim());
        Zip::from(&mut diff)
            .and(&self.data)
            .and(&other.data)
            .par_for_each(|d, &a, &b| *d = b - a);
        Some(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp() -> Volume {
        Volume::new(
            Array::from_iter((0..60).map(|v| v as f32))
                .into_shape_with_order((3, 4, 5))
                .unwrap(),
        )
    }

    #[test]
    fn planes_match_manual_indexing() {
        let volume = ramp();
        for k in 0..3 {
            let plane = volume.get_slice_from_axis(k, Orientation::Axial).unwrap();
            assert_eq!(plane, volume.data.index_axis(ndarray::Axis(0), k));
        }
        for k in 0..4 {
            let plane = volume.get_slice_from_axis(k, Orientation::Coronal).unwrap();
            assert_eq!(plane, volume.data.index_axis(ndarray::Axis(1), k));
        }
        for k in 0..5 {
            let plane = volume.get_slice_from_axis(k, Orientation::Sagittal).unwrap();
            assert_eq!(plane, volume.data.index_axis(ndarray::Axis(2), k));
            assert_eq!(plane.dim(), (3, 4));
        }
    }

    #[test]
    fn index_range_is_bounded_per_orientation() {
        let volume = ramp();
        assert_eq!(volume.axis_len(Orientation::Axial), 3);
        assert_eq!(volume.axis_len(Orientation::Coronal), 4);
        assert_eq!(volume.axis_len(Orientation::Sagittal), 5);
        assert!(volume.get_slice_from_axis(3, Orientation::Axial).is_none());
        assert!(volume.get_slice_from_axis(4, Orientation::Sagittal).is_some());
    }

    #[test]
    fn labels_and_indicators() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data[[0, 0, 0]] = 3.0;
        data[[1, 1, 1]] = 1.0;
        data[[1, 0, 1]] = 3.0;
        let volume = Volume::new(data);

        assert_eq!(volume.present_labels(), vec![1, 3]);
        let indicator = volume.indicator(3);
        assert_eq!(indicator.sum(), 2.0);
        assert_eq!(indicator[[1, 0, 1]], 1.0);
        assert_eq!(volume.value_range(), (0.0, 3.0));
    }

    #[test]
    fn difference_requires_matching_shapes() {
        let a = ramp();
        let b = Volume::new(a.data.mapv(|v| v * 2.0));
        let diff = a.difference(&b).unwrap();
        assert_eq!(diff[[2, 3, 4]], 59.0);

        let other = Volume::new(Array3::zeros((1, 1, 1)));
        assert!(a.difference(&other).is_none());
    }
}
