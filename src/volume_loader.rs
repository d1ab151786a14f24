use crate::{
    enums::{Interpolation, SortBy},
    interpolator::Interpolator,
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use log::{debug, info, warn};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions in series {0}")]
    InconsistentDimensions(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Where a CT slice sits in patient space.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceGeometry {
    pub sop_instance_uid: String,
    /// Image Position (Patient): x, y, z of the first transmitted pixel, in mm.
    pub image_position: [f64; 3],
    /// Pixel Spacing: row spacing, column spacing, in mm.
    pub pixel_spacing: [f64; 2],
}

/// One decoded CT image before it is stacked into a volume.
#[derive(Clone, Debug)]
pub struct CtSlice {
    pub series_uid: String,
    pub geometry: SliceGeometry,
    pub order: Option<f64>,
    pub pixels: Array2<i16>,
}

/// All CT slices of one series stacked in ascending depth order.
#[derive(Debug)]
pub struct StudyVolume {
    pub series_uid: String,
    pub data: Array3<i16>,
    /// Geometry of each slice, index-aligned with axis 0 of `data`.
    pub slices: Vec<SliceGeometry>,
}

impl StudyVolume {
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn z_positions(&self) -> Vec<f64> {
        self.slices.iter().map(|s| s.image_position[2]).collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LoaderOptions {
    /// Edge length of the square output grid.
    pub grid: usize,
    /// `Interpolation::None` skips slices off the grid, `Bilinear` resamples them.
    pub resampling: Interpolation,
    pub sort_by: SortBy,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            grid: crate::config::DEFAULT_GRID,
            resampling: Interpolation::None,
            sort_by: SortBy::default(),
        }
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load every `CT.*.dcm` file in a directory and assemble one volume per series
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        options: &LoaderOptions,
    ) -> Result<Vec<StudyVolume>, VolumeLoaderError> {
        let paths = Self::collect_ct_paths(path.as_ref())?;
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        info!(
            "Found {} CT files in {}",
            paths.len(),
            path.as_ref().display()
        );

        Self::load_from_file_paths(&paths, options)
    }

    /// Load volumes from file paths, reading and decoding files in parallel
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        options: &LoaderOptions,
    ) -> Result<Vec<StudyVolume>, VolumeLoaderError> {
        let slices: Result<Vec<_>, VolumeLoaderError> = paths
            .par_iter()
            .map(|path| -> Result<Option<CtSlice>, VolumeLoaderError> {
                let dicom_object = open_file(path.as_ref())?;
                let slice = Self::extract_slice(&dicom_object, options);
                if slice.is_none() {
                    debug!("Skipping {}", path.as_ref().display());
                }
                Ok(slice)
            })
            .collect();

        Self::assemble(slices?.into_iter().flatten().collect(), options.sort_by)
    }

    /// Load volumes from DICOM objects already in memory
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        options: &LoaderOptions,
    ) -> Result<Vec<StudyVolume>, VolumeLoaderError> {
        let slices = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, options))
            .collect();

        Self::assemble(slices, options.sort_by)
    }

    /// Group slices by series, order each series and stack it.
    ///
    /// Sorting is stable: slices with equal keys keep their input order.
    pub fn assemble(
        slices: Vec<CtSlice>,
        sort_by: SortBy,
    ) -> Result<Vec<StudyVolume>, VolumeLoaderError> {
        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let mut series: BTreeMap<String, Vec<CtSlice>> = BTreeMap::new();
        for slice in slices {
            series
                .entry(slice.series_uid.clone())
                .or_default()
                .push(slice);
        }

        series
            .into_iter()
            .map(|(series_uid, mut slices)| {
                Self::sort_slices(&mut slices, sort_by);
                Self::validate_dimensions(&series_uid, &slices)?;
                let data = Self::build_volume_array(&slices);
                info!(
                    "Series {}: {} slices of {}x{}",
                    series_uid,
                    slices.len(),
                    data.dim().1,
                    data.dim().2
                );
                Ok(StudyVolume {
                    series_uid,
                    data,
                    slices: slices.into_iter().map(|s| s.geometry).collect(),
                })
            })
            .collect()
    }

    pub(crate) fn collect_ct_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_dicom_named(path, "CT."))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        options: &LoaderOptions,
    ) -> Option<CtSlice> {
        let series_uid = string_attr(dicom_object, tags::SERIES_INSTANCE_UID)?;
        let sop_instance_uid = string_attr(dicom_object, tags::SOP_INSTANCE_UID)?;
        let image_position: [f64; 3] = multi_f64_attr(dicom_object, tags::IMAGE_POSITION_PATIENT)?
            .get(..3)?
            .try_into()
            .ok()?;
        let mut pixel_spacing: [f64; 2] = multi_f64_attr(dicom_object, tags::PIXEL_SPACING)?
            .get(..2)?
            .try_into()
            .ok()?;
        let order = Self::get_sort_order(dicom_object, &image_position, &options.sort_by)?;

        let mut pixels = Self::decode_image(dicom_object)?;
        let (rows, cols) = pixels.dim();
        if (rows, cols) != (options.grid, options.grid) {
            match options.resampling {
                Interpolation::None => {
                    warn!(
                        "Skipping CT slice {}: {}x{} is not on the {}x{} grid",
                        sop_instance_uid, rows, cols, options.grid, options.grid
                    );
                    return None;
                }
                Interpolation::Bilinear => {
                    pixels = Self::resample(&pixels, options.grid);
                    pixel_spacing[0] *= rows as f64 / options.grid as f64;
                    pixel_spacing[1] *= cols as f64 / options.grid as f64;
                }
            }
        }

        Some(CtSlice {
            series_uid,
            geometry: SliceGeometry {
                sop_instance_uid,
                image_position,
                pixel_spacing,
            },
            order,
            pixels,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        image_position: &[f64; 3],
        sort_by: &SortBy,
    ) -> Option<Option<f64>> {
        match sort_by {
            SortBy::ImagePositionPatient => Some(Some(image_position[2])),
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float64()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(f64::from);
                Some(num)
            }
            SortBy::None => Some(None),
        }
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<i16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        // Stored values as written; rescale slope/intercept are not applied.
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixel_data
            .to_ndarray_with_options::<i16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn resample(pixels: &Array2<i16>, grid: usize) -> Array2<i16> {
        let as_float = pixels.mapv(f32::from);
        Interpolator::resample(&as_float.view(), grid, grid)
            .mapv(|v| v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
    }

    fn sort_slices(slices: &mut [CtSlice], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(series_uid: &str, slices: &[CtSlice]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].pixels.dim();
        if slices.iter().any(|slice| slice.pixels.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions(
                series_uid.to_string(),
            ));
        }
        Ok(())
    }

    fn build_volume_array(slices: &[CtSlice]) -> Array3<i16> {
        let (height, width) = slices[0].pixels.dim();
        let depth = slices.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.pixels);
        }

        volume
    }
}

/// `true` for `<prefix>*.dcm` (extension compared case-insensitively).
pub(crate) fn is_dicom_named(path: &Path, prefix: &str) -> bool {
    let has_prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(prefix));
    let has_extension = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"));
    path.is_file() && has_prefix && has_extension
}

pub(crate) fn string_attr(
    dicom_object: &InMemDicomObject,
    tag: dicom::core::Tag,
) -> Option<String> {
    dicom_object
        .element(tag)
        .ok()?
        .to_str()
        .ok()
        .map(|value| value.trim_end_matches(['\0', ' ']).trim().to_string())
}

pub(crate) fn multi_f64_attr(
    dicom_object: &InMemDicomObject,
    tag: dicom::core::Tag,
) -> Option<Vec<f64>> {
    dicom_object.element(tag).ok()?.to_multi_float64().ok()
}
