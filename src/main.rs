use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use ct_overlay::{
    CombinedArray, Orientation, Overlay, SliceOptions,
    colormap::Colormap,
    config::PrepareConfig,
    enums::{CoordinateMapping, MaskLayout, SortBy},
    isosurface,
    prepare::prepare,
    slice_view::render_slice,
    structure_set::StructureSetReader,
    volume::Volume,
    volume_render::{DifferenceVolume, RenderOptions, VolumeRenderer},
};
use log::info;
use std::path::{Path, PathBuf};

/// Prepare CT volumes with RT structure masks and render them
#[derive(Parser, Debug)]
#[command(name = "ct-overlay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stack CT series and rasterized ROI masks into .npy arrays
    Prepare(PrepareArgs),
    /// List the ROIs of an RT structure set file
    Rois {
        #[arg(value_name = "RS_FILE")]
        file: PathBuf,
    },
    /// Print the shape and labels of a combined array
    Info {
        #[arg(value_name = "NPY")]
        input: PathBuf,
    },
    /// Render one slice with an optional mask overlay
    Slice(SliceArgs),
    /// Volume-render one or more arrays
    Volume(VolumeArgs),
    /// Render two arrays side by side from the same viewpoint
    Compare(CompareArgs),
    /// Render the significant differences between two CT volumes
    Diff(DiffArgs),
}

#[derive(Args, Debug)]
struct PrepareArgs {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Patient number, selects ./data/SAMPLE_00{patient}/
    #[arg(short, long)]
    patient: Option<String>,
    /// Directory holding CT.*.dcm and RS*.dcm files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Slice grid size
    #[arg(long)]
    grid: Option<usize>,
    /// Resample off-grid slices instead of skipping them
    #[arg(long)]
    no_strict_grid: bool,
    #[arg(long)]
    sort_by: Option<SortBy>,
    /// How contour points map onto the pixel grid
    #[arg(long)]
    mapping: Option<CoordinateMapping>,
    /// One label channel, or one channel per mapped ROI
    #[arg(long)]
    layout: Option<MaskLayout>,
}

#[derive(Args, Debug)]
struct MaskArgs {
    /// Mask channel (1-based)
    #[arg(short, long, default_value_t = 1)]
    mask_channel: usize,
    /// Ignore the mask channels
    #[arg(long)]
    no_mask: bool,
}

#[derive(Args, Debug)]
struct SliceArgs {
    #[arg(value_name = "NPY")]
    input: PathBuf,
    #[arg(long, value_enum, default_value_t = Orientation::Axial)]
    orientation: Orientation,
    /// Slice index; the middle slice when omitted
    #[arg(short, long)]
    index: Option<usize>,
    #[command(flatten)]
    mask: MaskArgs,
    /// Overlay only this label
    #[arg(long)]
    label: Option<u32>,
    /// Mask overlay opacity
    #[arg(long, default_value_t = 0.4, value_parser = opacity_legal_range)]
    alpha: f32,
    #[arg(long, value_enum, default_value_t = Colormap::Gray)]
    colormap: Colormap,
    #[arg(long, allow_hyphen_values = true)]
    vmin: Option<f32>,
    #[arg(long, allow_hyphen_values = true)]
    vmax: Option<f32>,
    #[arg(short, long, default_value = "slice.png")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ViewArgs {
    /// Viewing direction
    #[arg(long, value_enum, default_value_t = Orientation::Coronal)]
    view: Orientation,
    #[arg(long, value_enum, default_value_t = Colormap::Bone)]
    colormap: Colormap,
    /// Opacity unit distance in voxels
    #[arg(long, value_parser = positive)]
    unit_distance: Option<f32>,
}

impl ViewArgs {
    fn renderer(&self) -> VolumeRenderer {
        VolumeRenderer::new(RenderOptions {
            view: self.view,
            colormap: self.colormap,
            opacity_unit_distance: self.unit_distance,
            ..Default::default()
        })
    }
}

#[derive(Args, Debug)]
struct VolumeArgs {
    #[arg(value_name = "NPY", required = true)]
    inputs: Vec<PathBuf>,
    #[command(flatten)]
    view: ViewArgs,
    #[command(flatten)]
    mask: MaskArgs,
    /// Also write one STL surface per label into this directory
    #[arg(long)]
    surfaces_dir: Option<PathBuf>,
    /// Voxel spacing (x y z) applied to STL surfaces
    #[arg(long, num_args = 3, default_values_t = vec![1.0, 1.0, 1.0])]
    spacing: Vec<f32>,
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct CompareArgs {
    first: PathBuf,
    second: PathBuf,
    #[command(flatten)]
    view: ViewArgs,
    #[command(flatten)]
    mask: MaskArgs,
    #[arg(short, long, default_value = "compare.png")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct DiffArgs {
    first: PathBuf,
    second: PathBuf,
    /// Differences below this percentile of |second - first| are dropped
    #[arg(long, default_value_t = 95.0, value_parser = percentile_legal_range)]
    percentile: f32,
    #[command(flatten)]
    view: ViewArgs,
    #[arg(short, long, default_value = "difference.png")]
    output: PathBuf,
}

fn opacity_legal_range(s: &str) -> Result<f32, String> {
    let alpha: f32 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a legal opacity"))?;
    if !(0.0..=1.0).contains(&alpha) {
        return Err(format!("opacity should be in range [0, 1], but got `{alpha}`"));
    }
    Ok(alpha)
}

fn percentile_legal_range(s: &str) -> Result<f32, String> {
    let q: f32 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a legal percentile"))?;
    if !(0.0..=100.0).contains(&q) {
        return Err(format!("percentile should be in range [0, 100], but got `{q}`"));
    }
    Ok(q)
}

fn positive(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !(value > 0.0 && value.is_finite()) {
        return Err(format!("expected a positive value, but got `{value}`"));
    }
    Ok(value)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Command::Prepare(args) => run_prepare(args),
        Command::Rois { file } => run_rois(&file),
        Command::Info { input } => run_info(&input),
        Command::Slice(args) => run_slice(args),
        Command::Volume(args) => run_volume(args),
        Command::Compare(args) => run_compare(args),
        Command::Diff(args) => run_diff(args),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run_prepare(args: PrepareArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PrepareConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PrepareConfig::default(),
    };
    if let Some(patient) = args.patient {
        config.patient = patient;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }
    if let Some(out_dir) = args.out_dir {
        config.out_dir = out_dir;
    }
    if let Some(grid) = args.grid {
        config.grid = grid;
    }
    if args.no_strict_grid {
        config.strict_grid = false;
    }
    if let Some(sort_by) = args.sort_by {
        config.sort_by = sort_by;
    }
    if let Some(mapping) = args.mapping {
        config.coordinate_mapping = mapping;
    }
    if let Some(layout) = args.layout {
        config.mask_layout = layout;
    }

    let studies = prepare(&config)?;
    for study in &studies {
        println!(
            "{}: {:?}, {} contoured slices -> {}",
            study.series_uid,
            study.shape,
            study.contoured_slices,
            study.path.display()
        );
    }
    Ok(())
}

fn run_rois(file: &Path) -> Result<()> {
    let dicom_object = dicom::object::open_file(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let Some(rois) = StructureSetReader::summarize(&dicom_object) else {
        bail!("{} has no ROI contour sequence", file.display());
    };

    for roi in rois {
        let name = roi.roi_name.as_deref().unwrap_or("<unnamed>");
        match roi.first_contour_points {
            Some(points) => println!(
                "ROI #{}: {} ({} contours, first contour has {} points)",
                roi.roi_number, name, roi.contour_count, points
            ),
            None => println!("ROI #{}: {} (no contours)", roi.roi_number, name),
        }
    }
    Ok(())
}

fn run_info(input: &Path) -> Result<()> {
    let array = load(input)?;
    let (depth, height, width, channels) = array.dim();
    let (low, high) = array.ct().value_range();
    println!("Shape: ({depth}, {height}, {width}, {channels})");
    println!("CT range: [{low}, {high}]");
    println!("Mask channels: {}", array.num_masks());
    for channel in 1..=array.num_masks() {
        println!("  {}: labels {:?}", channel, array.mask(channel)?.present_labels());
    }
    Ok(())
}

fn run_slice(args: SliceArgs) -> Result<()> {
    let array = load(&args.input)?;
    let ct = array.ct();
    let mask = optional_mask(&array, &args.mask)?;

    let orientation = args.orientation;
    let index = args.index.unwrap_or(ct.axis_len(orientation) / 2);
    if !ct.is_valid_index(index, orientation) {
        bail!(
            "{} slice {} is out of range 0..{}",
            orientation.label(),
            index,
            ct.axis_len(orientation)
        );
    }

    let Some(plane) = ct.get_slice_from_axis(index, orientation) else {
        bail!("No {} slice at index {}", orientation.label(), index);
    };
    let mask_plane = mask
        .as_ref()
        .and_then(|mask| mask.get_slice_from_axis(index, orientation));
    let options = SliceOptions {
        colormap: args.colormap,
        vmin: args.vmin,
        vmax: args.vmax,
        overlay: Some(Overlay {
            alpha: args.alpha,
            label: args.label,
            ..Default::default()
        }),
    };

    let image = render_slice(&plane, mask_plane.as_ref(), &options)?;
    image.save(&args.output)?;
    info!(
        "Saved {} slice {} to {}",
        orientation.label(),
        index,
        args.output.display()
    );
    Ok(())
}

fn run_volume(args: VolumeArgs) -> Result<()> {
    let renderer = args.view.renderer();
    std::fs::create_dir_all(&args.out_dir)?;
    if let Some(dir) = &args.surfaces_dir {
        std::fs::create_dir_all(dir)?;
    }

    for input in &args.inputs {
        let array = load(input)?;
        let ct = array.ct();
        let labels = optional_mask(&array, &args.mask)?;

        let stem = file_stem(input);
        let output = args
            .out_dir
            .join(format!("{}_{:?}.png", stem, args.view.view).to_lowercase());
        renderer.render(&ct, labels.as_ref())?.save(&output)?;
        info!("Saved volume render of {} to {}", input.display(), output.display());

        if let (Some(dir), Some(labels)) = (&args.surfaces_dir, &labels) {
            let spacing = [args.spacing[0], args.spacing[1], args.spacing[2]];
            let surfaces = isosurface::extract_surfaces(labels, spacing)?;
            for path in isosurface::write_label_surfaces(&surfaces, dir, stem)? {
                info!("Saved surface {}", path.display());
            }
        }
    }
    Ok(())
}

fn run_compare(args: CompareArgs) -> Result<()> {
    let (first, second) = (load(&args.first)?, load(&args.second)?);
    let (first_ct, second_ct) = (first.ct(), second.ct());
    let first_labels = optional_mask(&first, &args.mask)?;
    let second_labels = optional_mask(&second, &args.mask)?;

    let image = args.view.renderer().render_comparison(
        (&first_ct, first_labels.as_ref()),
        (&second_ct, second_labels.as_ref()),
    )?;
    image.save(&args.output)?;
    info!("Saved comparison to {}", args.output.display());
    Ok(())
}

fn run_diff(args: DiffArgs) -> Result<()> {
    let (first, second) = (load(&args.first)?.ct(), load(&args.second)?.ct());
    let difference = DifferenceVolume::compute(&first, &second, args.percentile)?;

    let image = args
        .view
        .renderer()
        .render_difference(&first, &difference)?;
    image.save(&args.output)?;
    info!("Saved difference render to {}", args.output.display());
    Ok(())
}

fn load(path: &Path) -> Result<CombinedArray> {
    CombinedArray::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// The requested mask channel, or `None` when masks are disabled or absent.
fn optional_mask(array: &CombinedArray, args: &MaskArgs) -> Result<Option<Volume>> {
    if args.no_mask || array.num_masks() == 0 {
        return Ok(None);
    }
    Ok(Some(array.mask(args.mask_channel)?))
}

fn file_stem(path: &Path) -> &str {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("volume")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn slice_args(args: &[&str]) -> SliceArgs {
        let cli = Cli::try_parse_from(["ct-overlay", "slice"].iter().chain(args)).unwrap();
        match cli.command {
            Command::Slice(args) => args,
            other => panic!("expected slice, got {other:?}"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn slices_default_to_axial() {
        let args = slice_args(&["study.npy"]);
        assert_eq!(args.orientation, Orientation::Axial);
        assert_eq!(args.index, None);
    }

    #[test]
    fn slice_orientation_can_be_chosen() {
        let args = slice_args(&["study.npy", "--orientation", "sagittal"]);
        assert_eq!(args.orientation, Orientation::Sagittal);
    }
}
