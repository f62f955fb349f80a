//! ui-dataset: synthetic UI-widget object detection datasets.
//!
//! The pipeline drives an external UI renderer to capture labeled
//! screenshots, splits the captured pairs into a YOLO `train`/`val`/`test`
//! layout, rewrites the labels (class name to index, pixel boxes to
//! normalized boxes) and writes a YAML manifest for training tools.
//!
//! # Modules
//!
//! - [`capture`]: renderer invocation
//! - [`split`]: ratio-based random partitioning
//! - [`dataset`]: directory layout, file placement and fixes
//! - [`label`]: class tables and label line rewriting
//! - [`walk`]: label file discovery
//! - [`manifest`]: the YAML dataset descriptor
//! - [`tracking`]: registering finished datasets
//! - [`export`]: COCO and Darknet exports
//! - [`config`]: typed pipeline configuration
//! - [`error`]: the crate error type

mod atomic;
pub mod capture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod label;
pub mod manifest;
pub mod split;
pub mod tracking;
pub mod walk;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde::Serialize;

use capture::{CaptureOptions, CaptureSummary, Layout, RandomUi, Renderer};
use config::{ClassReplace, Fixes, NormalizeBbox, PipelineConfig};
use dataset::{AssembledDataset, AssemblyReport, DatasetLayout, IssueStage, PlacedPair};
use label::ClassTable;
use manifest::DatasetManifest;
use split::{Split, SplitRatio};
use tracking::{LocalRegistry, TrackedDataset};
use walk::{FileWalker, DEFAULT_SKIP_DIRS, DEFAULT_SKIP_FILES};

pub use error::DatasetError;

const DEFAULT_OUTPUT_FOLDER: &str = "tmp";
const DEFAULT_DATASET_NAME: &str = "custom";

/// The ui-dataset CLI application.
#[derive(Parser)]
#[command(name = "ui-dataset")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Log debug output (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture screenshots with the renderer and build a dataset from them.
    Generate(GenerateArgs),
    /// Build a dataset from previously captured image/label pairs.
    Assemble(AssembleArgs),
    /// Apply label fixes to existing label directories.
    Fix(FixArgs),
    /// Point a dataset manifest at a new dataset root.
    Relocate(RelocateArgs),
    /// Export a built dataset in another annotation format.
    Export(ExportArgs),
    /// Replace the root of the paths held in a dataset's descriptor files.
    RewritePaths(RewritePathsArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Options shared by every command that builds a dataset.
#[derive(clap::Args)]
struct BuildArgs {
    /// YAML pipeline config. Flags override values from the file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root folder for captures, datasets and manifests [default: tmp].
    #[arg(short = 'o', long)]
    output_folder: Option<PathBuf>,

    /// Dataset name [default: custom].
    #[arg(long)]
    dataset: Option<String>,

    /// Comma-separated class table [default: all widget types].
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,

    /// Train/val/test ratio as fractions or percentages, e.g. 70,10,20.
    #[arg(short = 'r', long)]
    split_ratio: Option<SplitRatio>,

    /// Seed for a reproducible split.
    #[arg(long)]
    seed: Option<u64>,

    /// Remove an existing dataset of the same name first.
    #[arg(long)]
    clean: bool,

    /// Replace class names in the labels with their class index.
    #[arg(long)]
    replace_class_names: bool,

    /// Normalize pixel bounding boxes.
    #[arg(long)]
    normalize_bbox: bool,

    /// Image width for --normalize-bbox; each label's image is measured when unset.
    #[arg(long, requires = "bbox_height")]
    bbox_width: Option<u32>,

    /// Image height for --normalize-bbox.
    #[arg(long, requires = "bbox_width")]
    bbox_height: Option<u32>,

    /// Also write a `<image> <label>` list of every placed pair.
    #[arg(long)]
    datalist: Option<PathBuf>,

    /// Register the finished dataset in this local registry directory.
    #[arg(long)]
    upload_to: Option<PathBuf>,

    /// Report format.
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct GenerateArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// MicroPython binary running the renderer.
    #[arg(long, env = capture::BIN_ENV)]
    renderer_bin: Option<PathBuf>,

    /// Renderer script.
    #[arg(long, env = capture::SCRIPT_ENV)]
    renderer_script: Option<PathBuf>,

    /// Directory the renderer runs in and writes its screenshot to.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    /// Delay between renderer invocations in milliseconds.
    #[arg(short = 'd', long)]
    delay: Option<u64>,

    /// Count a failing renderer invocation and keep going.
    #[arg(long)]
    continue_on_error: bool,

    /// Capture renderer stdout/stderr into error messages.
    #[arg(long)]
    capture_output: bool,

    /// Let the renderer write normalized boxes itself.
    #[arg(long)]
    normalize: bool,

    #[command(subcommand)]
    mode: GenerateMode,
}

#[derive(Subcommand)]
enum GenerateMode {
    /// Randomly generated UIs.
    Random(RandomArgs),
    /// UIs from design files.
    Design(DesignArgs),
}

#[derive(clap::Args)]
struct RandomArgs {
    /// Widget types to draw.
    #[arg(short = 't', long = "types", num_args = 1.., required = true)]
    widget_types: Vec<String>,

    /// Screenshot width.
    #[arg(short = 'W', long, default_value_t = 250)]
    width: u32,

    /// Screenshot height.
    #[arg(short = 'H', long, default_value_t = 250)]
    height: u32,

    /// Widgets per screenshot.
    #[arg(short = 'c', long, default_value_t = 1)]
    count: u32,

    #[arg(short = 'l', long, value_enum, default_value_t = Layout::None)]
    layout: Layout,

    /// Screenshots to capture.
    #[arg(short = 'i', long, default_value_t = 10)]
    iterations: usize,
}

#[derive(clap::Args)]
struct DesignArgs {
    /// Folder of design files.
    #[arg(short = 'f', long)]
    folder: PathBuf,
}

#[derive(clap::Args)]
struct AssembleArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Folder holding the captured `<stem>.txt` labels and their images.
    #[arg(long)]
    captures: PathBuf,
}

#[derive(clap::Args)]
struct FixArgs {
    /// Label directories to fix.
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Replace class names with their class index.
    #[arg(long)]
    replace_class_names: bool,

    /// Comma-separated class table [default: all widget types].
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,

    /// Normalize pixel bounding boxes.
    #[arg(long)]
    normalize_bbox: bool,

    /// Image width for --normalize-bbox.
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Image height for --normalize-bbox.
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Measure each label's image instead of using a fixed size.
    #[arg(long, conflicts_with_all = ["width", "height"])]
    from_images: bool,

    /// Extra directory names to skip (always skips: rico).
    #[arg(long = "skip-dir")]
    skip_dirs: Vec<String>,

    /// Extra file names to skip (always skips: train.txt, val.txt, test.txt).
    #[arg(long = "skip-file")]
    skip_files: Vec<String>,

    /// Report format.
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct RelocateArgs {
    /// Manifest to rewrite.
    manifest: PathBuf,

    /// New dataset root written to the manifest's `path`.
    #[arg(long)]
    root: String,
}

#[derive(clap::Args)]
struct ExportArgs {
    #[command(subcommand)]
    format: ExportFormat,
}

#[derive(Subcommand)]
enum ExportFormat {
    /// COCO detection JSON for one split.
    Coco(CocoArgs),
    /// Darknet split lists, classes.names and `<name>.data`.
    Darknet(DarknetArgs),
}

#[derive(clap::Args)]
struct CocoArgs {
    /// Manifest of the dataset to export.
    manifest: PathBuf,

    #[arg(long, value_enum, default_value_t = Split::Val)]
    split: Split,

    /// Output file [default: <dataset>/annotations/instances_<split>.json].
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
struct DarknetArgs {
    /// Manifest of the dataset to export.
    manifest: PathBuf,
}

#[derive(clap::Args)]
struct RewritePathsArgs {
    /// Dataset directory holding the descriptor files.
    dir: PathBuf,

    /// Root to replace.
    #[arg(long)]
    from: String,

    /// Replacement root.
    #[arg(long)]
    to: String,
}

/// JSON form of a build.
#[derive(Serialize)]
struct BuildSummary<'a> {
    manifest: &'a Path,
    report: &'a AssemblyReport,
    placed: &'a [PlacedPair],
    uploaded: Option<&'a str>,
}

/// Run the ui-dataset CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DatasetError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Generate(args)) => run_generate(args),
        Some(Commands::Assemble(args)) => run_assemble(args),
        Some(Commands::Fix(args)) => run_fix(args),
        Some(Commands::Relocate(args)) => run_relocate(args),
        Some(Commands::Export(args)) => run_export(args),
        Some(Commands::RewritePaths(args)) => run_rewrite_paths(args),
        None => {
            println!("ui-dataset {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Synthesize, split and normalize UI-widget object detection datasets.");
            println!();
            println!("Run 'ui-dataset --help' for usage information.");
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    // A logger may already be installed when embedded.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init();
}

/// A dataset build with flags merged over the config file.
struct BuildPlan {
    config: PipelineConfig,
    output_folder: PathBuf,
    dataset: String,
    classes: ClassTable,
}

impl BuildPlan {
    /// Merge `args` over the config file. `default_bbox` is the fixed image
    /// size used by --normalize-bbox when no size is given.
    fn resolve(args: &BuildArgs, default_bbox: Option<(u32, u32)>) -> Result<Self, DatasetError> {
        let mut config = match &args.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(folder) = &args.output_folder {
            config.output_folder = Some(folder.clone());
        }
        if let Some(name) = &args.dataset {
            config.dataset = Some(name.clone());
        }
        if let Some(classes) = &args.classes {
            config.classes = Some(classes.clone());
        }
        if let Some(ratio) = args.split_ratio {
            config.split_ratio = Some(ratio);
        }
        if args.seed.is_some() {
            config.seed = args.seed;
        }
        if args.datalist.is_some() {
            config.datalist = args.datalist.clone();
        }
        if args.upload_to.is_some() {
            config.upload_to = args.upload_to.clone();
        }
        config.clean |= args.clean;

        let classes = config.class_table()?;

        if args.replace_class_names {
            config.fixes.class_replace = Some(ClassReplace {
                class_names: Some(classes.names().to_vec()),
            });
        }
        if args.normalize_bbox {
            let size = args.bbox_width.zip(args.bbox_height).or(default_bbox);
            config.fixes.normalize_bbox = Some(match size {
                Some((width, height)) => NormalizeBbox {
                    width: Some(width),
                    height: Some(height),
                    from_images: false,
                },
                None => NormalizeBbox {
                    from_images: true,
                    ..Default::default()
                },
            });
        }

        let output_folder = config
            .output_folder
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FOLDER));
        let dataset = config
            .dataset
            .clone()
            .unwrap_or_else(|| DEFAULT_DATASET_NAME.to_string());

        Ok(Self {
            config,
            output_folder,
            dataset,
            classes,
        })
    }

    /// Fail on anything that would stop the build before capturing.
    fn preflight(&self) -> Result<(), DatasetError> {
        self.config.fixes.plan()?;
        let root = self.output_folder.join(&self.dataset);
        if fs::symlink_metadata(&root).is_ok() && !self.config.clean {
            return Err(DatasetError::AlreadyExists { path: root });
        }
        Ok(())
    }

    fn assemble(&self, pairs: Vec<dataset::FilePair>) -> Result<AssembledDataset, DatasetError> {
        dataset::assemble(
            &self.output_folder,
            &self.dataset,
            pairs,
            &self.classes,
            &self.config.assemble_options(),
        )
    }

    /// Write the datalist, upload, print the report and turn errors into
    /// the exit status.
    fn finish(&self, built: AssembledDataset, output: OutputFormat) -> Result<(), DatasetError> {
        if let Some(list) = &self.config.datalist {
            let pairs = built
                .placed
                .iter()
                .map(|p| (p.image.as_path(), p.label.as_path()));
            manifest::write_datalist(pairs, list)?;
            info!("Wrote datalist {}", list.display());
        }

        let mut uploaded = None;
        if let Some(registry_dir) = &self.config.upload_to {
            if built.report.is_clean() {
                let registry = LocalRegistry::new(registry_dir);
                let tracked = tracking::upload_dataset(
                    &registry,
                    &self.dataset,
                    built.layout.root(),
                    &built.manifest_path,
                    tracking::dataset_metadata(&self.classes, &built.report.placed),
                )?;
                uploaded = Some(tracked.id().to_string());
            } else {
                warn!("Not uploading '{}': the build had errors", self.dataset);
            }
        }

        match output {
            OutputFormat::Json => {
                let summary = BuildSummary {
                    manifest: &built.manifest_path,
                    report: &built.report,
                    placed: &built.placed,
                    uploaded: uploaded.as_deref(),
                };
                print_json(&summary)?;
            }
            OutputFormat::Text => {
                print!("{}", built.report);
                println!("Manifest: {}", built.manifest_path.display());
                if let Some(id) = &uploaded {
                    println!("Uploaded as {id}");
                }
            }
        }

        check_report(&built.report)
    }
}

fn run_generate(args: GenerateArgs) -> Result<(), DatasetError> {
    let default_bbox = match &args.mode {
        GenerateMode::Random(random) => Some((random.width, random.height)),
        GenerateMode::Design(_) => None,
    };
    let mut plan = BuildPlan::resolve(&args.build, default_bbox)?;
    plan.config.continue_on_error |= args.continue_on_error;
    plan.config.capture_output |= args.capture_output;
    if let Some(delay) = args.delay {
        plan.config.delay_ms = delay;
    }
    plan.preflight()?;

    if args.normalize && plan.config.fixes.normalize_bbox.is_some() {
        warn!("Both the renderer and --normalize-bbox normalize boxes; labels will be normalized twice");
    }

    let binary = args.renderer_bin.ok_or_else(|| {
        DatasetError::config(format!(
            "renderer binary not set; pass --renderer-bin or set {}",
            capture::BIN_ENV
        ))
    })?;
    let script = args.renderer_script.ok_or_else(|| {
        DatasetError::config(format!(
            "renderer script not set; pass --renderer-script or set {}",
            capture::SCRIPT_ENV
        ))
    })?;
    let renderer = Renderer::new(binary, script, &args.working_dir)?
        .normalize(args.normalize)
        .capture_output(plan.config.capture_output);
    let opts = CaptureOptions {
        delay: Duration::from_millis(plan.config.delay_ms),
        continue_on_error: plan.config.continue_on_error,
    };

    let (summary, description) = match &args.mode {
        GenerateMode::Random(random) => {
            let ui = RandomUi {
                width: random.width,
                height: random.height,
                count: random.count,
                layout: random.layout,
                widget_types: random.widget_types.clone(),
            };
            let summary =
                capture::capture_random(&renderer, &ui, random.iterations, &plan.output_folder, &opts)?;
            let description = format!(
                "random: {} screenshot(s) of {}x{}, {} widget(s), layout {}, types {}",
                random.iterations,
                ui.width,
                ui.height,
                ui.count,
                ui.layout,
                ui.widget_types.join(" ")
            );
            (summary, description)
        }
        GenerateMode::Design(design) => {
            let summary =
                capture::capture_designs(&renderer, &design.folder, &plan.output_folder, &opts)?;
            (summary, format!("design: {}", design.folder.display()))
        }
    };

    let CaptureSummary { pairs, failures } = summary;
    let mut built = plan.assemble(pairs)?;
    for failure in failures {
        built
            .report
            .record(IssueStage::Capture, failure.item, failure.message);
    }

    manifest::append_comment(
        &built.manifest_path,
        &format!(
            "Generated by ui-dataset {}\n{}",
            env!("CARGO_PKG_VERSION"),
            description
        ),
    )?;

    plan.finish(built, args.build.output)
}

fn run_assemble(args: AssembleArgs) -> Result<(), DatasetError> {
    let plan = BuildPlan::resolve(&args.build, None)?;
    plan.preflight()?;

    let pairs = dataset::discover_pairs(&args.captures)?;
    info!(
        "Found {} captured pair(s) in {}",
        pairs.len(),
        args.captures.display()
    );
    let built = plan.assemble(pairs)?;
    manifest::append_comment(
        &built.manifest_path,
        &format!("Assembled from {}", args.captures.display()),
    )?;

    plan.finish(built, args.build.output)
}

fn run_fix(args: FixArgs) -> Result<(), DatasetError> {
    let classes = match &args.classes {
        Some(names) => ClassTable::new(names.iter().cloned())?,
        None => ClassTable::widgets(),
    };

    let fixes = Fixes {
        class_replace: args.replace_class_names.then(|| ClassReplace {
            class_names: Some(classes.names().to_vec()),
        }),
        normalize_bbox: args.normalize_bbox.then_some(NormalizeBbox {
            width: args.width,
            height: args.height,
            from_images: args.from_images,
        }),
    };
    let plan = fixes.plan()?;
    if plan.is_empty() {
        return Err(DatasetError::config(
            "nothing to do; pass --replace-class-names and/or --normalize-bbox",
        ));
    }

    let walker = FileWalker::labels(&args.dirs)
        .skip_dirs(DEFAULT_SKIP_DIRS)
        .skip_dirs(args.skip_dirs)
        .skip_files(DEFAULT_SKIP_FILES)
        .skip_files(args.skip_files);

    let mut report = AssemblyReport::default();
    dataset::apply_fixes(&walker, &plan, &mut report);

    match args.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            if report.files_fixed == 0 && report.is_clean() {
                println!("No label files found");
            } else {
                print!("{report}");
            }
        }
    }

    check_report(&report)
}

fn run_relocate(args: RelocateArgs) -> Result<(), DatasetError> {
    let manifest = manifest::relocate_manifest(&args.manifest, &args.root)?;
    println!(
        "Relocated {} to '{}'",
        args.manifest.display(),
        manifest.path
    );
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<(), DatasetError> {
    match args.format {
        ExportFormat::Coco(coco) => {
            let manifest = DatasetManifest::load(&coco.manifest)?;
            let classes = manifest.class_table()?;
            let root = manifest.root(&coco.manifest);
            let export = export::yolo_to_coco(
                &root.join(coco.split.labels_dir()),
                &root.join(coco.split.images_dir()),
                &classes,
            )?;
            let output = coco.output.unwrap_or_else(|| {
                root.join("annotations")
                    .join(format!("instances_{}.json", coco.split))
            });
            export::write_coco(&export.coco, &output)?;
            if export.skipped_lines > 0 {
                warn!("Skipped {} unusable label line(s)", export.skipped_lines);
            }
            println!(
                "Exported {} image(s) and {} annotation(s) to {}",
                export.coco.images.len(),
                export.coco.annotations.len(),
                output.display()
            );
        }
        ExportFormat::Darknet(darknet) => {
            let manifest = DatasetManifest::load(&darknet.manifest)?;
            let classes = manifest.class_table()?;
            let name = darknet
                .manifest
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    DatasetError::config(format!(
                        "'{}' does not name a manifest file",
                        darknet.manifest.display()
                    ))
                })?;
            let layout = DatasetLayout::at(manifest.root(&darknet.manifest));
            let files = export::export_darknet(&layout, &name, &classes)?;
            println!("Wrote {}", files.data_file.display());
        }
    }
    Ok(())
}

fn run_rewrite_paths(args: RewritePathsArgs) -> Result<(), DatasetError> {
    let totals = export::rewrite_root_paths(&args.dir, &args.from, &args.to)?;
    println!(
        "Rewrote {} line(s) in {} of {} file(s)",
        totals.lines_rewritten, totals.files_changed, totals.files_scanned
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DatasetError> {
    let json =
        serde_json::to_string_pretty(value).map_err(|source| DatasetError::ReportWrite { source })?;
    println!("{json}");
    Ok(())
}

fn check_report(report: &AssemblyReport) -> Result<(), DatasetError> {
    if report.is_clean() {
        Ok(())
    } else {
        Err(DatasetError::BuildFailed {
            error_count: report.error_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn unserializable_report_is_a_report_write_error() {
        // JSON object keys must be strings.
        let value = BTreeMap::from([((1u8, 2u8), 3u8)]);

        let err = print_json(&value).unwrap_err();

        assert!(matches!(err, DatasetError::ReportWrite { .. }));
    }
}
