use clap::ValueEnum;
use serde::Deserialize;

/// Anatomical plane of a `(Z, Y, X)` volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Orientation {
    /// XY plane, indexed along Z (axis 0)
    Axial,
    /// XZ plane, indexed along Y (axis 1)
    Coronal,
    /// YZ plane, indexed along X (axis 2)
    Sagittal,
}

impl Orientation {
    pub fn axis(&self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Orientation::Axial => "Axial (XY)",
            Orientation::Coronal => "Coronal (XZ)",
            Orientation::Sagittal => "Sagittal (YZ)",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    Bilinear,
    #[default]
    None,
}

/// Key used to order CT slices inside a series. Sorting is always ascending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// How contour points in patient space become pixel coordinates.
///
/// The two strategies are not interchangeable: `PatientSpacing` places a
/// contour where it lies on the CT grid, `MinMax` stretches every contour to
/// fill the whole grid on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinateMapping {
    #[default]
    PatientSpacing,
    MinMax,
}

/// Channel layout of the combined array written by `prepare`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MaskLayout {
    /// One label channel holding every ROI code.
    #[default]
    Labels,
    /// One channel per mapped ROI, ordered by ROI code.
    PerRoi,
}
