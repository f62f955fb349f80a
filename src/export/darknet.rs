//! Darknet descriptors for an assembled dataset.
//!
//! ```text
//! <root>/train.txt        <image> <label> per line, likewise val.txt / test.txt
//! <root>/classes.names    one class name per line
//! <root>/<name>.data      classes=, train=, valid=, names=
//! ```
//!
//! The descriptors hold paths, so moving a dataset means rewriting them;
//! [`rewrite_root_paths`] does that.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::atomic::write_atomically;
use crate::dataset::{find_image, DatasetLayout};
use crate::error::DatasetError;
use crate::label::ClassTable;
use crate::manifest;
use crate::split::Split;
use crate::walk::{FileWalker, LABEL_EXTENSION};

pub const NAMES_FILE: &str = "classes.names";

/// Directories [`rewrite_root_paths`] never descends into: image and label
/// splits hold no paths.
pub const REWRITE_SKIP_DIRS: [&str; 4] = ["rico", "test", "train", "val"];

/// Files that may hold dataset paths.
pub const REWRITE_EXTENSIONS: [&str; 2] = ["data", "txt"];

/// Paths written by [`export_darknet`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DarknetFiles {
    pub data_file: PathBuf,
    pub names_file: PathBuf,
    pub lists: Vec<PathBuf>,
}

/// Write the `<name>.data` descriptor into `target_dir`.
pub fn write_data_file(
    target_dir: &Path,
    name: &str,
    num_classes: usize,
    train_file: &Path,
    val_file: &Path,
    names_file: &Path,
) -> Result<PathBuf, DatasetError> {
    fs::create_dir_all(target_dir).map_err(DatasetError::at(target_dir))?;
    let path = target_dir.join(format!("{name}.data"));

    let mut out = String::new();
    let _ = writeln!(out, "classes={num_classes}");
    let _ = writeln!(out, "train={}", train_file.display());
    let _ = writeln!(out, "valid={}", val_file.display());
    let _ = writeln!(out, "names={}", names_file.display());
    fs::write(&path, out).map_err(DatasetError::at(&path))?;
    Ok(path)
}

pub fn write_names_file(classes: &ClassTable, path: &Path) -> Result<(), DatasetError> {
    let mut out = String::new();
    for name in classes.names() {
        let _ = writeln!(out, "{name}");
    }
    fs::write(path, out).map_err(DatasetError::at(path))
}

/// Write split lists, the names file and `<name>.data` for the dataset at
/// `layout`. Labels without an image are left out of the lists.
pub fn export_darknet(
    layout: &DatasetLayout,
    name: &str,
    classes: &ClassTable,
) -> Result<DarknetFiles, DatasetError> {
    let root = layout.root();
    let mut lists = Vec::with_capacity(Split::ALL.len());

    for split in Split::ALL {
        let pairs = split_pairs(&layout.labels_dir(split), &layout.images_dir(split))?;
        let list = root.join(format!("{split}.txt"));
        manifest::write_datalist(
            pairs.iter().map(|(image, label)| (image.as_path(), label.as_path())),
            &list,
        )?;
        debug!("Listed {} pair(s) in {}", pairs.len(), list.display());
        lists.push(list);
    }

    let names_file = root.join(NAMES_FILE);
    write_names_file(classes, &names_file)?;

    let data_file = write_data_file(
        root,
        name,
        classes.len(),
        &lists[0],
        &lists[1],
        &names_file,
    )?;
    info!("Wrote Darknet descriptor {}", data_file.display());

    Ok(DarknetFiles {
        data_file,
        names_file,
        lists,
    })
}

fn split_pairs(labels_dir: &Path, images_dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>, DatasetError> {
    if !labels_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut pairs = Vec::new();
    for entry in fs::read_dir(labels_dir).map_err(DatasetError::at(labels_dir))? {
        let label = entry.map_err(DatasetError::at(labels_dir))?.path();
        let is_label = label.is_file()
            && label
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LABEL_EXTENSION));
        if !is_label {
            continue;
        }
        let Some(stem) = label.file_stem().map(PathBuf::from) else {
            continue;
        };
        if let Some(image) = find_image(images_dir, &stem) {
            pairs.push((image, label));
        }
    }
    pairs.sort();
    Ok(pairs)
}

/// Totals from [`rewrite_root_paths`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RootRewrite {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub lines_rewritten: usize,
}

/// Replace the root `from` with `to` in every path held by the descriptor
/// files under `dir`.
pub fn rewrite_root_paths(dir: &Path, from: &str, to: &str) -> Result<RootRewrite, DatasetError> {
    let from = from.trim_end_matches(['/', '\\']);
    let to = to.trim_end_matches(['/', '\\']);
    if from.is_empty() {
        return Err(DatasetError::config("the root to replace must not be empty"));
    }

    let walker = FileWalker::new([dir])
        .skip_dirs(REWRITE_SKIP_DIRS)
        .skip_files([NAMES_FILE])
        .with_extensions(REWRITE_EXTENSIONS);

    let mut totals = RootRewrite::default();
    for file in walker.files() {
        let path = file?;
        totals.files_scanned += 1;

        let text = fs::read_to_string(&path).map_err(DatasetError::at(&path))?;
        let mut out = String::with_capacity(text.len());
        let mut rewritten = 0;
        for line in text.split_inclusive('\n') {
            match rewrite_root(line, from, to) {
                Some(new) => {
                    out.push_str(&new);
                    rewritten += 1;
                }
                None => out.push_str(line),
            }
        }

        if rewritten > 0 {
            debug!("Rewrote {rewritten} line(s) in {}", path.display());
            write_atomically(&path, out.as_bytes())?;
            totals.files_changed += 1;
            totals.lines_rewritten += rewritten;
        }
    }

    info!(
        "Replaced '{from}' with '{to}' in {} of {} file(s)",
        totals.files_changed, totals.files_scanned
    );
    Ok(totals)
}

/// Replace `from` at the start of each path token in `line`.
///
/// Tokens are separated by whitespace or `=`. A token matches when it is
/// `from` itself or continues with a path separator, so `/data` never
/// touches `/database`. Returns `None` when nothing matched.
pub fn rewrite_root(line: &str, from: &str, to: &str) -> Option<String> {
    let mut out = String::with_capacity(line.len());
    let mut changed = false;
    let mut rest = line;

    while !rest.is_empty() {
        let end = rest.find(is_separator).unwrap_or(rest.len());
        let (token, tail) = rest.split_at(end);
        match token.strip_prefix(from) {
            Some(suffix) if suffix.is_empty() || suffix.starts_with(['/', '\\']) => {
                out.push_str(to);
                out.push_str(suffix);
                changed = true;
            }
            _ => out.push_str(token),
        }

        let sep = tail.chars().next().map_or(0, char::len_utf8);
        out.push_str(&tail[..sep]);
        rest = &tail[sep..];
    }

    changed.then_some(out)
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == '='
}
