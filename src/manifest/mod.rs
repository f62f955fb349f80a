//! YAML dataset descriptor consumed by YOLO training tooling.
//!
//! ```yaml
//! path: ./widgets      # dataset root, relative to this file
//! train: images/train  # relative to `path`
//! val: images/val
//! test: images/test
//! names:
//!   0: arc
//!   1: bar
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomically;
use crate::error::DatasetError;
use crate::label::ClassTable;

/// The dataset descriptor written next to the dataset directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub path: String,
    pub train: String,
    pub val: String,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(deserialize_with = "deserialize_names")]
    pub names: BTreeMap<usize, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

fn deserialize_names<'de, D>(deserializer: D) -> Result<BTreeMap<usize, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match ManifestNames::deserialize(deserializer)? {
        ManifestNames::Sequence(names) => names.into_iter().enumerate().collect(),
        ManifestNames::Mapping(mapping) => mapping,
    })
}

impl DatasetManifest {
    /// Describe `<root>/<dataset_name>` with the given split directories.
    pub fn new(
        dataset_name: &str,
        classes: &ClassTable,
        train_dir: impl Into<String>,
        val_dir: impl Into<String>,
        test_dir: Option<String>,
    ) -> Self {
        Self {
            path: format!("./{dataset_name}"),
            train: train_dir.into(),
            val: val_dir.into(),
            test: test_dir,
            names: classes.to_index_map(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let data = fs::read_to_string(path).map_err(DatasetError::at(path))?;
        serde_yaml::from_str(&data).map_err(|source| DatasetError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        let yaml = serde_yaml::to_string(self).map_err(|source| DatasetError::ManifestWrite {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomically(path, yaml.as_bytes())
    }

    /// The dataset root, with a relative `path` resolved against the
    /// directory holding the manifest at `manifest_path`.
    pub fn root(&self, manifest_path: &Path) -> PathBuf {
        let base = manifest_path.parent().unwrap_or(Path::new(""));
        let rel: PathBuf = Path::new(&self.path)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        base.join(rel)
    }

    /// The `names` table as a class table.
    pub fn class_table(&self) -> Result<ClassTable, DatasetError> {
        ClassTable::from_index_map(&self.names)
    }
}

/// Where the manifest for `dataset_name` lives: `<output_root>/<name>.yaml`.
pub fn manifest_path(output_root: &Path, dataset_name: &str) -> PathBuf {
    output_root.join(format!("{dataset_name}.yaml"))
}

/// Write the manifest for a dataset built under `output_root`.
pub fn write_manifest(
    output_root: &Path,
    dataset_name: &str,
    classes: &ClassTable,
    train_dir: &str,
    val_dir: &str,
    test_dir: Option<&str>,
) -> Result<DatasetManifest, DatasetError> {
    let manifest = DatasetManifest::new(
        dataset_name,
        classes,
        train_dir,
        val_dir,
        test_dir.map(str::to_string),
    );
    let path = manifest_path(output_root, dataset_name);
    manifest.save(&path)?;
    info!("Wrote dataset manifest {}", path.display());
    Ok(manifest)
}

/// Append a free-text comment trailer, one `# ` line per input line.
pub fn append_comment(path: &Path, comment: &str) -> Result<(), DatasetError> {
    let mut trailer = String::new();
    for line in comment.lines() {
        let _ = writeln!(trailer, "# {line}");
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(DatasetError::at(path))?;
    file.write_all(trailer.as_bytes())
        .map_err(DatasetError::at(path))
}

/// Point the manifest's `path` at `new_root`, e.g. where a downloaded copy
/// of the dataset lives. Comment trailers are not preserved.
pub fn relocate_manifest(path: &Path, new_root: &str) -> Result<DatasetManifest, DatasetError> {
    let mut manifest = DatasetManifest::load(path)?;
    info!(
        "Relocating {} from '{}' to '{}'",
        path.display(),
        manifest.path,
        new_root
    );
    manifest.path = new_root.to_string();
    manifest.save(path)?;
    Ok(manifest)
}

/// Write a plain `<image> <label>` list, one pair per line.
pub fn write_datalist<'a, I>(pairs: I, path: &Path) -> Result<(), DatasetError>
where
    I: IntoIterator<Item = (&'a Path, &'a Path)>,
{
    let mut out = String::new();
    for (image, label) in pairs {
        let _ = writeln!(out, "{} {}", image.display(), label.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(DatasetError::at(parent))?;
    }
    fs::write(path, out).map_err(DatasetError::at(path))
}
