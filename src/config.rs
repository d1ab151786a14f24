use crate::enums::{CoordinateMapping, Interpolation, MaskLayout, SortBy};

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Edge length of the square grid CT slices and masks are aligned to.
pub const DEFAULT_GRID: usize = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("ROI code {code} is used by both {first} and {second}")]
    DuplicateRoiCode {
        code: u8,
        first: String,
        second: String,
    },

    #[error("ROI code 0 is reserved for background (ROI {0})")]
    ReservedRoiCode(String),

    #[error("Grid size must be at least 2, got {0}")]
    InvalidGrid(usize),
}

/// Maps structure-set ROI names to the integer codes written into masks.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RoiMapping(BTreeMap<String, u8>);

impl Default for RoiMapping {
    fn default() -> Self {
        Self::from_pairs([
            ("CTV_Low", 1),
            ("CTV_High", 2),
            ("PTV_Low", 3),
            ("PTV_High", 4),
            ("GTV", 5),
            ("Lungs", 6),
        ])
    }
}

impl RoiMapping {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, u8)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(name, code)| (name.to_string(), code))
                .collect(),
        )
    }

    pub fn code(&self, roi_name: &str) -> Option<u8> {
        self.0.get(roi_name).copied()
    }

    /// Mapped ROIs ordered by code.
    pub fn by_code(&self) -> Vec<(&str, u8)> {
        let mut entries: Vec<_> = self
            .0
            .iter()
            .map(|(name, &code)| (name.as_str(), code))
            .collect();
        entries.sort_by_key(|&(_, code)| code);
        entries
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: BTreeMap<u8, &str> = BTreeMap::new();
        for (name, &code) in &self.0 {
            if code == 0 {
                return Err(ConfigError::ReservedRoiCode(name.clone()));
            }
            if let Some(first) = seen.insert(code, name) {
                return Err(ConfigError::DuplicateRoiCode {
                    code,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Settings for the volume preparation pipeline.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// patient = "2"
/// coordinate_mapping = "min-max"
///
/// [roi_mapping]
/// GTV = 1
/// Lungs = 2
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    pub patient: String,
    /// Defaults to `./data/SAMPLE_00{patient}/` when unset.
    pub data_dir: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub grid: usize,
    /// Skip CT slices that are not already on the grid instead of resampling them.
    pub strict_grid: bool,
    pub sort_by: SortBy,
    pub coordinate_mapping: CoordinateMapping,
    pub mask_layout: MaskLayout,
    pub roi_mapping: RoiMapping,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            patient: "1".to_string(),
            data_dir: None,
            out_dir: PathBuf::from("."),
            grid: DEFAULT_GRID,
            strict_grid: true,
            sort_by: SortBy::default(),
            coordinate_mapping: CoordinateMapping::default(),
            mask_layout: MaskLayout::default(),
            roi_mapping: RoiMapping::default(),
        }
    }
}

impl PrepareConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid < 2 {
            return Err(ConfigError::InvalidGrid(self.grid));
        }
        self.roi_mapping.validate()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./data/SAMPLE_00{}/", self.patient)))
    }

    pub fn resampling(&self) -> Interpolation {
        if self.strict_grid {
            Interpolation::None
        } else {
            Interpolation::Bilinear
        }
    }
}
