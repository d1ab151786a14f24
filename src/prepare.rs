//! Volume preparation: CT series + structure sets -> combined `.npy` arrays.

use crate::{
    combined::{self, CombinedError},
    config::PrepareConfig,
    enums::MaskLayout,
    rasterize::{self, RasterError},
    structure_set::{ContourIndex, RoiContour, StructureSetError, StructureSetReader},
    volume_loader::{LoaderOptions, StudyVolume, VolumeLoader, VolumeLoaderError},
};

use log::{debug, info};
use ndarray::{Array3, s};
use std::{fs, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Volume(#[from] VolumeLoaderError),

    #[error(transparent)]
    StructureSet(#[from] StructureSetError),

    #[error("Slice {slice}: {source}")]
    Raster { slice: String, source: RasterError },

    #[error(transparent)]
    Combined(#[from] CombinedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One combined array written to disk.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedStudy {
    pub series_uid: String,
    pub path: PathBuf,
    /// (depth, height, width, channels)
    pub shape: (usize, usize, usize, usize),
    /// Slices that received at least one contour.
    pub contoured_slices: usize,
}

/// Run the whole pipeline for the configured patient directory.
pub fn prepare(config: &PrepareConfig) -> Result<Vec<PreparedStudy>, PrepareError> {
    config.validate()?;
    let data_dir = config.data_dir();
    let options = LoaderOptions {
        grid: config.grid,
        resampling: config.resampling(),
        sort_by: config.sort_by,
    };

    info!("Processing CT volumes in {}", data_dir.display());
    let volumes = VolumeLoader::load_from_directory(&data_dir, &options)?;

    info!("Processing contours");
    let contours = StructureSetReader::load_from_directory(&data_dir, &config.roi_mapping)?;

    fs::create_dir_all(&config.out_dir)?;
    volumes
        .iter()
        .map(|volume| {
            let masks = build_masks(volume, &contours, config)?;
            let contoured_slices = volume
                .slices
                .iter()
                .filter(|g| contours.contains_key(&g.sop_instance_uid))
                .count();

            let array = combined::stack_channels(&volume.data, &masks)?;
            let path = config
                .out_dir
                .join(combined::output_file_name(&config.patient, &volume.series_uid));
            combined::write_combined(&path, &array)?;
            info!("Saved combined data to {}", path.display());

            Ok(PreparedStudy {
                series_uid: volume.series_uid.clone(),
                path,
                shape: array.dim(),
                contoured_slices,
            })
        })
        .collect()
}

/// Rasterize the contours of one study into mask channels per `config.mask_layout`.
pub fn build_masks(
    volume: &StudyVolume,
    contours: &ContourIndex,
    config: &PrepareConfig,
) -> Result<Vec<Array3<u8>>, PrepareError> {
    match config.mask_layout {
        MaskLayout::Labels => Ok(vec![rasterize_volume(volume, contours, config, |_| true)?]),
        MaskLayout::PerRoi => config
            .roi_mapping
            .by_code()
            .into_iter()
            .map(|(name, code)| {
                debug!("Rasterizing channel for {} ({})", name, code);
                rasterize_volume(volume, contours, config, |c| c.roi_code == code)
            })
            .collect(),
    }
}

fn rasterize_volume(
    volume: &StudyVolume,
    contours: &ContourIndex,
    config: &PrepareConfig,
    keep: impl Fn(&RoiContour) -> bool,
) -> Result<Array3<u8>, PrepareError> {
    let (depth, height, width) = volume.dim();
    let mut masks = Array3::<u8>::zeros((depth, height, width));

    for (i, geometry) in volume.slices.iter().enumerate() {
        let Some(slice_contours) = contours.get(&geometry.sop_instance_uid) else {
            continue;
        };
        let selected: Vec<RoiContour> = slice_contours.iter().filter(|c| keep(*c)).cloned().collect();
        if selected.is_empty() {
            continue;
        }
        let mask = rasterize::rasterize_slice(
            &selected,
            geometry,
            config.coordinate_mapping,
            config.grid,
        )
        .map_err(|source| PrepareError::Raster {
            slice: geometry.sop_instance_uid.clone(),
            source,
        })?;
        masks.slice_mut(s![i, .., ..]).assign(&mask);
    }

    Ok(masks)
}
