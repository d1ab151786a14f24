//! # CT overlay library
//!
//! Prepares CT series and their DICOM RT structure sets for inspection and
//! training, and renders the result.
//!
//! Preparation reads every `CT.*.dcm` and `RS*.dcm` file in a patient
//! directory. CT slices are grouped by series, ordered by their position
//! along the patient axis and stacked into a `(Z, Y, X)` volume. ROI contours
//! are rasterized onto the slices they reference, producing integer label
//! masks, and the CT is stacked with its masks into a single
//! `(Z, Y, X, C)` array saved as `.npy`. Channel 0 holds the CT values.
//!
//! Visualization works on those arrays:
//!  - 2D slices in any of the three medical axes with windowing, a named
//!    colormap and an optional mask overlay
//!  - 3D volume renders with label surfaces
//!  - side-by-side comparison of two volumes and their thresholded difference
//!  - STL export of the label surfaces
//!
//! DICOM files are decoded in parallel using rayon, and the render loops run
//! per image row in parallel as well.
//!
//! # Examples
//!
//! ## Preparing a patient directory
//!
//! ```no_run
//! # use ct_overlay::{PrepareConfig, prepare};
//! let config = PrepareConfig {
//!     patient: "2".to_string(),
//!     ..Default::default()
//! };
//! for study in prepare(&config).expect("should have prepared the study") {
//!     println!("{} -> {}", study.series_uid, study.path.display());
//! }
//! ```
//!
//! ## Rendering the middle coronal slice with its mask
//!
//! ```no_run
//! # use ct_overlay::{CombinedArray, Orientation, Overlay, SliceOptions, render_slice};
//! let array = CombinedArray::load("volume_contours_1.npy").expect("should have loaded array");
//! let (ct, mask) = (array.ct(), array.mask(1).expect("should have a mask channel"));
//! let index = ct.axis_len(Orientation::Coronal) / 2;
//! let options = SliceOptions {
//!     overlay: Some(Overlay::default()),
//!     ..Default::default()
//! };
//! let image = render_slice(
//!     &ct.get_slice_from_axis(index, Orientation::Coronal).unwrap(),
//!     mask.get_slice_from_axis(index, Orientation::Coronal).as_ref(),
//!     &options,
//! )
//! .expect("should have rendered slice");
//! image.save("slice.png").unwrap();
//! ```

pub mod colormap;
pub mod combined;
pub mod config;
pub mod enums;
mod interpolator;
pub mod isosurface;
pub mod prepare;
pub mod rasterize;
pub mod slice_view;
pub mod structure_set;
pub mod volume;
pub mod volume_loader;
pub mod volume_render;
pub mod window;

pub use colormap::Colormap;
pub use combined::CombinedArray;
pub use config::{PrepareConfig, RoiMapping};
pub use enums::{CoordinateMapping, MaskLayout, Orientation, SortBy};
pub use prepare::{PreparedStudy, prepare};
pub use slice_view::{Overlay, SliceOptions, render_slice};
pub use volume::Volume;
pub use volume_render::{DifferenceVolume, RenderOptions, VolumeRenderer};
