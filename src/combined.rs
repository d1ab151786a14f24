//! The combined CT + mask array exchanged between preparation and viewing.
//!
//! Layout is `(Z, Y, X, C)`: channel 0 holds CT samples, channels `1..C`
//! hold label masks.

use crate::volume::Volume;

use log::debug;
use ndarray::{Array3, Array4, Axis, s};
use ndarray_npy::{ReadNpyError, WriteNpyError, read_npy, write_npy};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CombinedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write array: {0}")]
    Write(#[from] WriteNpyError),

    #[error("{0} is not a 3D or 4D array of a supported numeric type")]
    Unsupported(PathBuf),

    #[error("Mask shape {mask:?} does not match CT shape {ct:?}")]
    ShapeMismatch {
        ct: (usize, usize, usize),
        mask: (usize, usize, usize),
    },

    #[error("Mask channel {channel} out of range 1..={available}")]
    MissingChannel { channel: usize, available: usize },
}

/// File name used for the array of one patient series.
pub fn output_file_name(patient: &str, series_uid: &str) -> String {
    format!("volume_contours_{patient}_{series_uid}.npy")
}

/// Stack CT and masks along a trailing channel axis.
///
/// CT samples are copied unchanged into channel 0.
pub fn stack_channels(
    ct: &Array3<i16>,
    masks: &[Array3<u8>],
) -> Result<Array4<i16>, CombinedError> {
    let (depth, height, width) = ct.dim();
    if let Some(mask) = masks.iter().find(|mask| mask.dim() != ct.dim()) {
        return Err(CombinedError::ShapeMismatch {
            ct: ct.dim(),
            mask: mask.dim(),
        });
    }

    let mut combined = Array4::<i16>::zeros((depth, height, width, masks.len() + 1));
    combined.slice_mut(s![.., .., .., 0]).assign(ct);
    for (i, mask) in masks.iter().enumerate() {
        combined
            .slice_mut(s![.., .., .., i + 1])
            .assign(&mask.mapv(i16::from));
    }
    Ok(combined)
}

pub fn write_combined(path: impl AsRef<Path>, combined: &Array4<i16>) -> Result<(), CombinedError> {
    write_npy(path, combined)?;
    Ok(())
}

/// A combined array loaded for viewing.
#[derive(Clone, Debug)]
pub struct CombinedArray {
    data: Array4<f32>,
}

impl CombinedArray {
    pub fn new(data: Array4<f32>) -> Self {
        Self { data }
    }

    /// Load a `.npy` file.
    ///
    /// 4D files are taken as `(Z, Y, X, C)`; 3D files as a bare CT volume
    /// without masks. Integer and float element types are converted to `f32`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CombinedError> {
        let path = path.as_ref();

        macro_rules! try_read {
            ($($t:ty),*) => {$(
                match read_npy::<_, Array4<$t>>(path) {
                    Ok(array) => return Ok(Self::new(array.mapv(|v| f64::from(v) as f32))),
                    Err(ReadNpyError::Io(e)) => return Err(e.into()),
                    Err(e) => debug!("{} is not 4D {}: {}", path.display(), stringify!($t), e),
                }
                match read_npy::<_, Array3<$t>>(path) {
                    Ok(array) => {
                        let data = array.mapv(|v| f64::from(v) as f32).insert_axis(Axis(3));
                        return Ok(Self::new(data));
                    }
                    Err(ReadNpyError::Io(e)) => return Err(e.into()),
                    Err(e) => debug!("{} is not 3D {}: {}", path.display(), stringify!($t), e),
                }
            )*};
        }

        try_read!(i16, u16, u8, i32, f32, f64);
        Err(CombinedError::Unsupported(path.to_path_buf()))
    }

    /// (depth, height, width, channels)
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn num_masks(&self) -> usize {
        self.data.len_of(Axis(3)).saturating_sub(1)
    }

    pub fn ct(&self) -> Volume {
        Volume::new(self.data.index_axis(Axis(3), 0).to_owned())
    }

    /// Mask channel `channel`, counted from 1.
    pub fn mask(&self, channel: usize) -> Result<Volume, CombinedError> {
        if channel == 0 || channel > self.num_masks() {
            return Err(CombinedError::MissingChannel {
                channel,
                available: self.num_masks(),
            });
        }
        Ok(Volume::new(
            self.data.index_axis(Axis(3), channel).to_owned(),
        ))
    }

    /// The mask channel, or an empty label volume when the array has none.
    pub fn labels_or_empty(&self, channel: usize) -> Result<Volume, CombinedError> {
        if self.num_masks() == 0 {
            let (depth, height, width, _) = self.dim();
            return Ok(Volume::new(Array3::zeros((depth, height, width))));
        }
        self.mask(channel)
    }
}
