//! RT structure-set reading.
//!
//! Contours are collected from the `ROIContourSequence` of every `RS*.dcm`
//! file and indexed by the SOP Instance UID of the CT image they were drawn
//! on, which is how they are matched to volume slices later.

use crate::{
    config::RoiMapping,
    volume_loader::{is_dicom_named, multi_f64_attr, string_attr},
};

use dicom::object::{InMemDicomObject, open_file};
use dicom_dictionary_std::tags;
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructureSetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// One closed contour of a mapped ROI, in patient coordinates (mm).
#[derive(Clone, Debug, PartialEq)]
pub struct RoiContour {
    pub roi_name: String,
    pub roi_code: u8,
    pub points: Vec<[f64; 3]>,
}

/// Contours keyed by referenced SOP Instance UID.
pub type ContourIndex = HashMap<String, Vec<RoiContour>>;

/// Overview of one ROI in a structure set.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiSummary {
    pub roi_number: i32,
    pub roi_name: Option<String>,
    pub contour_count: usize,
    pub first_contour_points: Option<usize>,
}

pub struct StructureSetReader;

impl StructureSetReader {
    /// Read every `RS*.dcm` file in a directory into one contour index.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        mapping: &RoiMapping,
    ) -> Result<ContourIndex, StructureSetError> {
        let mut index = ContourIndex::new();
        for rs_path in Self::collect_rs_paths(path.as_ref())? {
            let dicom_object = open_file(&rs_path)?;
            if Self::index_contours(&dicom_object, mapping, &mut index) {
                info!("Read contours from {}", rs_path.display());
            } else {
                warn!(
                    "Skipping {}: no ROIContourSequence",
                    rs_path.display()
                );
            }
        }
        Ok(index)
    }

    pub(crate) fn collect_rs_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_dicom_named(path, "RS"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Add the mapped contours of one structure set to `index`.
    ///
    /// Returns `false` when the object has no `ROIContourSequence`.
    pub fn index_contours(
        dicom_object: &InMemDicomObject,
        mapping: &RoiMapping,
        index: &mut ContourIndex,
    ) -> bool {
        let Some(roi_contours) = dicom_object
            .element(tags::ROI_CONTOUR_SEQUENCE)
            .ok()
            .and_then(|seq| seq.items())
        else {
            return false;
        };

        let names = Self::roi_names(dicom_object);
        for roi_contour in roi_contours {
            let Some(roi_number) = referenced_roi_number(roi_contour) else {
                warn!("ROI contour without ReferencedROINumber");
                continue;
            };
            let Some(roi_name) = names.get(&roi_number) else {
                debug!("ROI #{} has no name", roi_number);
                continue;
            };
            let Some(roi_code) = mapping.code(roi_name) else {
                debug!("ROI {} is not mapped", roi_name);
                continue;
            };

            for contour in contour_items(roi_contour) {
                let Some(sop_uid) = referenced_image_uid(contour) else {
                    warn!("Contour of {} references no image", roi_name);
                    continue;
                };
                let points = contour_points(contour);
                index.entry(sop_uid).or_default().push(RoiContour {
                    roi_name: roi_name.clone(),
                    roi_code,
                    points,
                });
            }
        }
        true
    }

    /// Describe every ROI of a structure set, mapped or not.
    ///
    /// Returns `None` when the object has no `ROIContourSequence`.
    pub fn summarize(dicom_object: &InMemDicomObject) -> Option<Vec<RoiSummary>> {
        let roi_contours = dicom_object
            .element(tags::ROI_CONTOUR_SEQUENCE)
            .ok()?
            .items()?;
        let names = Self::roi_names(dicom_object);

        Some(
            roi_contours
                .iter()
                .filter_map(|roi_contour| {
                    let roi_number = referenced_roi_number(roi_contour)?;
                    let contours = contour_items(roi_contour);
                    Some(RoiSummary {
                        roi_number,
                        roi_name: names.get(&roi_number).cloned(),
                        contour_count: contours.len(),
                        first_contour_points: contours.first().map(|c| contour_points(c).len()),
                    })
                })
                .collect(),
        )
    }

    fn roi_names(dicom_object: &InMemDicomObject) -> HashMap<i32, String> {
        dicom_object
            .element(tags::STRUCTURE_SET_ROI_SEQUENCE)
            .ok()
            .and_then(|seq| seq.items())
            .unwrap_or_default()
            .iter()
            .filter_map(|roi| {
                let number = roi.element(tags::ROI_NUMBER).ok()?.to_int::<i32>().ok()?;
                let name = string_attr(roi, tags::ROI_NAME)?;
                Some((number, name))
            })
            .collect()
    }
}

fn referenced_roi_number(roi_contour: &InMemDicomObject) -> Option<i32> {
    roi_contour
        .element(tags::REFERENCED_ROI_NUMBER)
        .ok()?
        .to_int::<i32>()
        .ok()
}

fn contour_items(roi_contour: &InMemDicomObject) -> &[InMemDicomObject] {
    roi_contour
        .element(tags::CONTOUR_SEQUENCE)
        .ok()
        .and_then(|seq| seq.items())
        .unwrap_or_default()
}

fn referenced_image_uid(contour: &InMemDicomObject) -> Option<String> {
    contour
        .element(tags::CONTOUR_IMAGE_SEQUENCE)
        .ok()?
        .items()?
        .first()
        .and_then(|image| string_attr(image, tags::REFERENCED_SOP_INSTANCE_UID))
}

fn contour_points(contour: &InMemDicomObject) -> Vec<[f64; 3]> {
    multi_f64_attr(contour, tags::CONTOUR_DATA)
        .unwrap_or_default()
        .chunks_exact(3)
        .map(|p| [p[0], p[1], p[2]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, value::DataSetSequence};

    fn sequence(tag: dicom::core::Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
        DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
    }

    fn contour(sop_uid: &str, points: &[f64]) -> InMemDicomObject {
        let image = InMemDicomObject::from_element_iter([DataElement::new(
            tags::REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_uid),
        )]);
        InMemDicomObject::from_element_iter([
            sequence(tags::CONTOUR_IMAGE_SEQUENCE, vec![image]),
            DataElement::new(
                tags::CONTOUR_DATA,
                VR::DS,
                PrimitiveValue::F64(points.iter().copied().collect()),
            ),
        ])
    }

    fn structure_set() -> InMemDicomObject {
        let rois = vec![(1, "GTV"), (2, "Heart")]
            .into_iter()
            .map(|(number, name)| {
                InMemDicomObject::from_element_iter([
                    DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from(number)),
                    DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from(name)),
                ])
            })
            .collect();

        let gtv = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::REFERENCED_ROI_NUMBER,
                VR::IS,
                PrimitiveValue::from(1_i32),
            ),
            sequence(
                tags::CONTOUR_SEQUENCE,
                vec![
                    contour("1.2.3.1", &[0.0, 0.0, 5.0, 10.0, 0.0, 5.0, 10.0, 10.0, 5.0]),
                    contour("1.2.3.2", &[0.0, 0.0, 7.5, 4.0, 4.0, 7.5, 0.0, 4.0, 7.5]),
                ],
            ),
        ]);
        let heart = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::REFERENCED_ROI_NUMBER,
                VR::IS,
                PrimitiveValue::from(2_i32),
            ),
            sequence(
                tags::CONTOUR_SEQUENCE,
                vec![contour("1.2.3.1", &[1.0, 1.0, 5.0, 2.0, 1.0, 5.0])],
            ),
        ]);

        InMemDicomObject::from_element_iter([
            sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, rois),
            sequence(tags::ROI_CONTOUR_SEQUENCE, vec![gtv, heart]),
        ])
    }

    #[test]
    fn mapped_contours_are_indexed_by_image() {
        let mut index = ContourIndex::new();
        let found =
            StructureSetReader::index_contours(&structure_set(), &RoiMapping::default(), &mut index);

        assert!(found);
        assert_eq!(index.len(), 2);

        let first = &index["1.2.3.1"];
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].roi_name, "GTV");
        assert_eq!(first[0].roi_code, 5);
        assert_eq!(first[0].points[2], [10.0, 10.0, 5.0]);
    }

    #[test]
    fn unmapped_rois_are_skipped() {
        let mapping = RoiMapping::from_pairs([("Heart", 9)]);
        let mut index = ContourIndex::new();
        StructureSetReader::index_contours(&structure_set(), &mapping, &mut index);

        assert_eq!(index.len(), 1);
        assert_eq!(index["1.2.3.1"][0].roi_code, 9);
        assert_eq!(index["1.2.3.1"][0].points.len(), 2);
    }

    #[test]
    fn object_without_contour_sequence_is_reported() {
        let mut index = ContourIndex::new();
        let found = StructureSetReader::index_contours(
            &InMemDicomObject::new_empty(),
            &RoiMapping::default(),
            &mut index,
        );
        assert!(!found);
        assert!(index.is_empty());
        assert!(StructureSetReader::summarize(&InMemDicomObject::new_empty()).is_none());
    }

    #[test]
    fn summary_lists_every_roi() {
        let summary = StructureSetReader::summarize(&structure_set()).unwrap();
        assert_eq!(
            summary,
            vec![
                RoiSummary {
                    roi_number: 1,
                    roi_name: Some("GTV".to_string()),
                    contour_count: 2,
                    first_contour_points: Some(3),
                },
                RoiSummary {
                    roi_number: 2,
                    roi_name: Some("Heart".to_string()),
                    contour_count: 1,
                    first_contour_points: Some(2),
                },
            ]
        );
    }
}
