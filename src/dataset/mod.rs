//! Dataset assembly.
//!
//! Takes the (image, label) pairs produced by the capture stage, moves them
//! into a YOLO `images/<split>` + `labels/<split>` layout, writes the
//! manifest and runs the configured label fixes over the result.
//!
//! Configuration is validated before anything on disk changes. After that,
//! creating the directory tree is all-or-nothing while moving and fixing
//! individual files continues past failures, which end up in the
//! [`AssemblyReport`].

mod report;

pub use report::{AssemblyIssue, AssemblyReport, IssueStage, SplitCounts};

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::config::{AssembleOptions, BboxSource, FixPlan};
use crate::error::DatasetError;
use crate::label::{self, ClassTable};
use crate::manifest::{self, DatasetManifest};
use crate::split::{self, Partition, Split};
use crate::walk::{FileWalker, LABEL_EXTENSION};

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "png", "jpeg", "bmp", "webp"];

/// A captured image and its label file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilePair {
    pub image: PathBuf,
    pub label: PathBuf,
}

impl FilePair {
    pub fn new(image: impl Into<PathBuf>, label: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            label: label.into(),
        }
    }
}

/// Where a pair ended up after assembly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlacedPair {
    pub split: Split,
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Directory layout of one dataset: `<output_root>/<name>/{images,labels}/<split>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(output_root: &Path, dataset_name: &str) -> Self {
        Self {
            root: output_root.join(dataset_name),
        }
    }

    /// The layout of an existing dataset directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self, split: Split) -> PathBuf {
        self.root.join(split.images_dir())
    }

    pub fn labels_dir(&self, split: Split) -> PathBuf {
        self.root.join(split.labels_dir())
    }

    pub fn label_dirs(&self) -> Vec<PathBuf> {
        Split::ALL.iter().map(|s| self.labels_dir(*s)).collect()
    }

    fn create(&self) -> Result<(), DatasetError> {
        for split in Split::ALL {
            for dir in [self.images_dir(split), self.labels_dir(split)] {
                fs::create_dir_all(&dir).map_err(DatasetError::at(&dir))?;
            }
        }
        Ok(())
    }
}

/// Result of [`assemble`].
#[derive(Clone, Debug)]
pub struct AssembledDataset {
    pub manifest: DatasetManifest,
    pub manifest_path: PathBuf,
    pub layout: DatasetLayout,
    pub placed: Vec<PlacedPair>,
    pub report: AssemblyReport,
}

/// Build `<output_root>/<dataset_name>` from `pairs`.
///
/// The pairs are moved, not copied. Fails with
/// [`DatasetError::AlreadyExists`] before touching anything if the dataset
/// directory exists and `opts.clean` is false. Nothing is uploaded.
pub fn assemble(
    output_root: &Path,
    dataset_name: &str,
    pairs: Vec<FilePair>,
    classes: &ClassTable,
    opts: &AssembleOptions,
) -> Result<AssembledDataset, DatasetError> {
    validate_dataset_name(dataset_name)?;
    let plan = opts.fixes.plan()?;
    let layout = DatasetLayout::new(output_root, dataset_name);

    if fs::symlink_metadata(layout.root()).is_ok() {
        if !opts.clean {
            return Err(DatasetError::AlreadyExists {
                path: layout.root().to_path_buf(),
            });
        }
        info!("Removing existing dataset directory {}", layout.root().display());
        fs::remove_dir_all(layout.root()).map_err(DatasetError::at(layout.root()))?;
    }
    layout.create()?;

    let total = pairs.len();
    let partition = split::partition_with_seed(pairs, &opts.split_ratio, opts.seed);
    info!(
        "Splitting {} pair(s) into {} train, {} val, {} test",
        total,
        partition.train.len(),
        partition.val.len(),
        partition.test.len()
    );

    let mut report = AssemblyReport::new(dataset_name);
    let placed = place_pairs(&layout, partition, &mut report);

    let manifest = manifest::write_manifest(
        output_root,
        dataset_name,
        classes,
        &Split::Train.images_dir(),
        &Split::Val.images_dir(),
        Some(&Split::Test.images_dir()),
    )?;

    apply_fixes(&FileWalker::labels(layout.label_dirs()), &plan, &mut report);

    info!(
        "Assembled '{}' with {} error(s)",
        dataset_name,
        report.error_count()
    );

    Ok(AssembledDataset {
        manifest,
        manifest_path: manifest::manifest_path(output_root, dataset_name),
        layout,
        placed,
        report,
    })
}

/// Run the planned fixes over every file the walker yields.
pub fn apply_fixes(walker: &FileWalker, plan: &FixPlan, report: &mut AssemblyReport) {
    if plan.is_empty() {
        return;
    }

    for entry in walker.files() {
        let label_path = match entry {
            Ok(path) => path,
            Err(err) => {
                let path = match &err {
                    DatasetError::Walk { path, .. } => path.clone(),
                    _ => PathBuf::new(),
                };
                warn!("{err}");
                report.record(IssueStage::Walk, path, &err);
                continue;
            }
        };

        let mut failed = false;

        if let Some(classes) = &plan.classes {
            match label::replace_class_names(&label_path, classes) {
                Ok(stats) => report.lines.merge(stats),
                Err(err) => {
                    warn!("{err}");
                    report.record(IssueStage::ClassReplace, &label_path, &err);
                    failed = true;
                }
            }
        }

        if let Some(source) = plan.bbox {
            let result = image_size(source, &label_path)
                .and_then(|(w, h)| label::normalize_bboxes(&label_path, w, h));
            match result {
                Ok(stats) => report.lines.merge(stats),
                Err(err) => {
                    warn!("{err}");
                    report.record(IssueStage::NormalizeBbox, &label_path, &err);
                    failed = true;
                }
            }
        }

        if !failed {
            report.files_fixed += 1;
        }
    }
}

/// Pair every label file directly inside `dir` with the image of the same
/// name. Labels without an image are skipped with a warning.
pub fn discover_pairs(dir: &Path) -> Result<Vec<FilePair>, DatasetError> {
    let mut pairs = Vec::new();

    for entry in fs::read_dir(dir).map_err(DatasetError::at(dir))? {
        let path = entry.map_err(DatasetError::at(dir))?.path();
        let is_label = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LABEL_EXTENSION));
        if !is_label {
            continue;
        }

        match find_image(dir, &path.with_extension("")) {
            Some(image) => pairs.push(FilePair::new(image, path)),
            None => warn!("No image found for label {}, skipping", path.display()),
        }
    }

    pairs.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(pairs)
}

fn validate_dataset_name(name: &str) -> Result<(), DatasetError> {
    // `components()` drops a trailing `/` or `/.`, so compare the file name too.
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    let bare = Path::new(name).file_name() == Some(OsStr::new(name))
        && !name.contains(['/', '\\']);
    if name.trim().is_empty() || !single_normal || !bare {
        return Err(DatasetError::config(format!(
            "dataset name '{name}' must be a single non-empty path component"
        )));
    }
    Ok(())
}

fn place_pairs(
    layout: &DatasetLayout,
    partition: Partition<FilePair>,
    report: &mut AssemblyReport,
) -> Vec<PlacedPair> {
    let mut placed = Vec::with_capacity(partition.len());

    for (split, pairs) in partition.into_splits() {
        let images_dir = layout.images_dir(split);
        let labels_dir = layout.labels_dir(split);

        for pair in pairs {
            match place_pair(&pair, &images_dir, &labels_dir) {
                Ok((image, label)) => {
                    report.placed.add(split);
                    placed.push(PlacedPair {
                        split,
                        image,
                        label,
                    });
                }
                Err(err) => {
                    warn!("{err}");
                    report.record(IssueStage::Move, &pair.image, &err);
                }
            }
        }
    }

    placed
}

/// Move both files of `pair` or neither.
fn place_pair(
    pair: &FilePair,
    images_dir: &Path,
    labels_dir: &Path,
) -> Result<(PathBuf, PathBuf), DatasetError> {
    let image = destination(&pair.image, images_dir)?;
    let label = destination(&pair.label, labels_dir)?;

    for source in [&pair.image, &pair.label] {
        if !source.is_file() {
            return Err(DatasetError::config(format!(
                "'{}' is missing",
                source.display()
            )));
        }
    }
    for target in [&image, &label] {
        if fs::symlink_metadata(target).is_ok() {
            return Err(DatasetError::AlreadyExists {
                path: target.clone(),
            });
        }
    }

    move_file(&pair.image, &image)?;
    if let Err(err) = move_file(&pair.label, &label) {
        if let Err(undo) = move_file(&image, &pair.image) {
            warn!(
                "Could not move {} back to {}: {undo}",
                image.display(),
                pair.image.display()
            );
        }
        return Err(err);
    }
    Ok((image, label))
}

fn destination(from: &Path, dir: &Path) -> Result<PathBuf, DatasetError> {
    let name = from.file_name().ok_or_else(|| {
        DatasetError::config(format!("'{}' does not name a file", from.display()))
    })?;
    Ok(dir.join(name))
}

/// Move a file, falling back to copy + remove across file systems.
/// An existing destination is never overwritten.
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<(), DatasetError> {
    if fs::symlink_metadata(to).is_ok() {
        return Err(DatasetError::AlreadyExists {
            path: to.to_path_buf(),
        });
    }

    if let Err(rename_err) = fs::rename(from, to) {
        if !from.is_file() {
            return Err(DatasetError::FileIo {
                path: from.to_path_buf(),
                source: rename_err,
            });
        }
        fs::copy(from, to).map_err(DatasetError::at(to))?;
        fs::remove_file(from).map_err(DatasetError::at(from))?;
    }

    Ok(())
}

fn image_size(source: BboxSource, label_path: &Path) -> Result<(u32, u32), DatasetError> {
    match source {
        BboxSource::Fixed { width, height } => Ok((width, height)),
        BboxSource::FromImages => {
            let image = image_for_label(label_path).ok_or_else(|| {
                DatasetError::config(format!(
                    "no image found for label {}",
                    label_path.display()
                ))
            })?;
            read_image_dimensions(&image)
        }
    }
}

/// Find `images/<rel>.<ext>` for a label at `labels/<rel>.txt`.
fn image_for_label(label_path: &Path) -> Option<PathBuf> {
    let labels_dir = label_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.file_name() == Some(OsStr::new("labels")))?;
    let rel = label_path.strip_prefix(labels_dir).ok()?.with_extension("");
    let images_dir = labels_dir.parent()?.join("images");
    find_image(&images_dir, &rel)
}

/// Probe `<dir>/<stem>.<ext>` for each known image extension. `stem` may
/// itself contain dots.
pub(crate) fn find_image(dir: &Path, stem: &Path) -> Option<PathBuf> {
    let base = dir.join(stem);
    IMAGE_EXTENSIONS.iter().find_map(|ext| {
        let mut name = OsString::from(base.as_os_str());
        name.push(".");
        name.push(ext);
        let candidate = PathBuf::from(name);
        candidate.is_file().then_some(candidate)
    })
}

pub(crate) fn read_image_dimensions(path: &Path) -> Result<(u32, u32), DatasetError> {
    let size = imagesize::size(path).map_err(|source| DatasetError::ImageDimensionRead {
        path: path.to_path_buf(),
        source,
    })?;

    let width = u32::try_from(size.width).map_err(|_| {
        DatasetError::config(format!(
            "image width {} of {} does not fit in u32",
            size.width,
            path.display()
        ))
    })?;
    let height = u32::try_from(size.height).map_err(|_| {
        DatasetError::config(format!(
            "image height {} of {} does not fit in u32",
            size.height,
            path.display()
        ))
    })?;

    Ok((width, height))
}
