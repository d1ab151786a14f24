use ct_overlay::{
    CombinedArray, DifferenceVolume, Orientation, Overlay, RenderOptions, SliceOptions,
    VolumeRenderer, combined, isosurface, render_slice,
};
use ndarray::{Array3, Array4, s};
use tempfile::TempDir;

const DEPTH: usize = 6;
const SIZE: usize = 10;

/// A dense cube of "tissue" in air, with label 2 marking its core.
fn synthetic_study() -> Array4<i16> {
    let mut ct = Array3::<i16>::from_elem((DEPTH, SIZE, SIZE), -1000);
    ct.slice_mut(s![1..5, 2..8, 2..8]).fill(40);
    let mut labels = Array3::<u8>::zeros((DEPTH, SIZE, SIZE));
    labels.slice_mut(s![2..4, 4..6, 4..6]).fill(2);
    combined::stack_channels(&ct, &[labels]).unwrap()
}

fn write_study(dir: &TempDir, name: &str, study: &Array4<i16>) -> std::path::PathBuf {
    let path = dir.path().join(name);
    combined::write_combined(&path, study).unwrap();
    path
}

#[test]
fn saved_array_renders_slices_with_overlay() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_study(&temp_dir, "volume_contours_1_1.2.3.npy", &synthetic_study());

    let array = CombinedArray::load(&path).unwrap();
    assert_eq!(array.dim(), (DEPTH, SIZE, SIZE, 2));
    assert_eq!(array.num_masks(), 1);

    let ct = array.ct();
    let mask = array.mask(1).unwrap();
    assert_eq!(mask.present_labels(), vec![2]);

    let plane = ct.get_slice_from_axis(3, Orientation::Axial).unwrap();
    let mask_plane = mask.get_slice_from_axis(3, Orientation::Axial).unwrap();
    let options = SliceOptions {
        vmin: Some(-1000.0),
        vmax: Some(40.0),
        overlay: Some(Overlay {
            alpha: 1.0,
            ..Default::default()
        }),
        ..Default::default()
    };
    let image = render_slice(&plane, Some(&mask_plane), &options).unwrap();
    assert_eq!(image.dimensions(), (SIZE as u32, SIZE as u32));

    // plane[[y, x]] is drawn at column y, row SIZE - 1 - x.
    assert_eq!(image.get_pixel(4, (SIZE - 1 - 4) as u32).0, [255, 0, 0, 255]);
    assert_eq!(image.get_pixel(2, (SIZE - 1 - 2) as u32).0, [255, 255, 255, 255]);
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);

    let saved = temp_dir.path().join("slice.png");
    image.save(&saved).unwrap();
    assert!(saved.exists());
}

#[test]
fn volume_render_shows_tissue_against_background() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_study(&temp_dir, "study.npy", &synthetic_study());
    let array = CombinedArray::load(&path).unwrap();
    let (ct, labels) = (array.ct(), array.mask(1).unwrap());

    let renderer = VolumeRenderer::new(RenderOptions {
        view: Orientation::Axial,
        ..Default::default()
    });
    let image = renderer.render(&ct, Some(&labels)).unwrap();
    assert_eq!(image.dimensions(), (SIZE as u32, SIZE as u32));

    let background = RenderOptions::default().background;
    let corner = image.get_pixel(0, 0).0;
    assert_eq!([corner[0], corner[1], corner[2]], background);
    let centre = image.get_pixel(5, 5).0;
    assert_ne!([centre[0], centre[1], centre[2]], background);
}

#[test]
fn comparison_and_difference_of_two_studies() {
    let temp_dir = TempDir::new().unwrap();
    let before = synthetic_study();
    let mut after = before.clone();
    after.slice_mut(s![2..4, 2..4, 2..4, 0]).fill(400);
    let first = CombinedArray::load(write_study(&temp_dir, "before.npy", &before)).unwrap();
    let second = CombinedArray::load(write_study(&temp_dir, "after.npy", &after)).unwrap();

    let renderer = VolumeRenderer::new(RenderOptions::default());
    let (first_ct, second_ct) = (first.ct(), second.ct());
    let comparison = renderer
        .render_comparison((&first_ct, None), (&second_ct, None))
        .unwrap();
    let (width, height) = renderer.output_dimensions(first_ct.dim());
    assert_eq!(comparison.dimensions(), (2 * width as u32, height as u32));

    let difference = DifferenceVolume::compute(&first_ct, &second_ct, 95.0).unwrap();
    assert_eq!(difference.abs_max, 360.0);
    assert_eq!(difference.data[[3, 3, 3]], 360.0);
    assert_eq!(difference.data[[0, 0, 0]], 0.0);

    let image = renderer.render_difference(&first_ct, &difference).unwrap();
    assert_eq!(image.dimensions(), (width as u32, height as u32));
}

#[test]
fn label_surfaces_are_written_as_stl() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_study(&temp_dir, "study.npy", &synthetic_study());
    let labels = CombinedArray::load(&path).unwrap().mask(1).unwrap();

    let surfaces = isosurface::extract_surfaces(&labels, [1.0; 3]).unwrap();
    assert_eq!(surfaces.len(), 1);
    // The 2x2x2 block at z 2..4, y 4..6, x 4..6 is enclosed half a voxel out.
    let (lo, hi) = surfaces[0].1.bounds().unwrap();
    for (i, (min, max)) in [(3.5, 5.5), (3.5, 5.5), (1.5, 3.5)].into_iter().enumerate() {
        assert!((lo[i] - min).abs() < 1e-4, "axis {i}: {} != {min}", lo[i]);
        assert!((hi[i] - max).abs() < 1e-4, "axis {i}: {} != {max}", hi[i]);
    }

    let paths = isosurface::write_label_surfaces(&surfaces, temp_dir.path(), "study").unwrap();
    assert_eq!(paths, vec![temp_dir.path().join("study_label_2.stl")]);
}
