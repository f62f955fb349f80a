//! Registering finished datasets with a dataset tracker.
//!
//! [`DatasetTracker`] is the seam to a tracking service. [`LocalRegistry`]
//! implements it on a plain directory:
//!
//! ```text
//! <registry>/<name>/dataset.json   record: id, files, metadata, finalized
//! <registry>/<name>/files/...      copies of everything added
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::atomic::write_atomically;
use crate::dataset::SplitCounts;
use crate::error::DatasetError;
use crate::label::ClassTable;

const RECORD_FILE: &str = "dataset.json";
const FILES_DIR: &str = "files";

/// A dataset version held by a tracker.
pub trait TrackedDataset {
    fn id(&self) -> &str;

    fn is_finalized(&self) -> bool;

    /// Add a file, or a directory with everything below it.
    fn add_files(&mut self, path: &Path) -> Result<(), DatasetError>;

    /// Merge `metadata` into the dataset's metadata.
    fn set_metadata(&mut self, metadata: BTreeMap<String, Value>) -> Result<(), DatasetError>;

    /// Freeze the dataset. Later modifications are rejected.
    fn finalize(&mut self) -> Result<(), DatasetError>;
}

pub trait DatasetTracker {
    type Dataset: TrackedDataset;

    fn get(&self, name: &str) -> Result<Option<Self::Dataset>, DatasetError>;

    fn create(&self, name: &str) -> Result<Self::Dataset, DatasetError>;
}

/// Register a built dataset: its directory, its manifest and `metadata`.
///
/// An existing unfinalized dataset of the same name is reused; a finalized
/// one is refused.
pub fn upload_dataset<T: DatasetTracker>(
    tracker: &T,
    name: &str,
    dataset_dir: &Path,
    manifest_path: &Path,
    metadata: BTreeMap<String, Value>,
) -> Result<T::Dataset, DatasetError> {
    let mut dataset = match tracker.get(name)? {
        Some(existing) if existing.is_finalized() => {
            return Err(DatasetError::AlreadyExists {
                path: PathBuf::from(name),
            });
        }
        Some(existing) => existing,
        None => tracker.create(name)?,
    };

    if dataset_dir.is_dir() {
        dataset.add_files(dataset_dir)?;
    }
    dataset.add_files(manifest_path)?;
    dataset.set_metadata(metadata)?;
    dataset.finalize()?;

    info!("Uploaded dataset '{}' as {}", name, dataset.id());
    Ok(dataset)
}

/// Metadata describing a built dataset.
pub fn dataset_metadata(classes: &ClassTable, counts: &SplitCounts) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("class_names".to_string(), json!(classes.names())),
        (
            "splits".to_string(),
            json!({ "train": counts.train, "val": counts.val, "test": counts.test }),
        ),
    ])
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub finalized: bool,
    /// Paths relative to the `files` directory.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// A tracker backed by a local directory.
#[derive(Clone, Debug)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetTracker for LocalRegistry {
    type Dataset = LocalDataset;

    fn get(&self, name: &str) -> Result<Option<LocalDataset>, DatasetError> {
        let dir = self.root.join(name);
        let record_path = dir.join(RECORD_FILE);
        if !record_path.is_file() {
            return Ok(None);
        }

        let data = fs::read(&record_path).map_err(DatasetError::at(&record_path))?;
        let record = serde_json::from_slice(&data).map_err(|source| {
            DatasetError::RegistryRecord {
                path: record_path.clone(),
                source,
            }
        })?;
        Ok(Some(LocalDataset { dir, record }))
    }

    fn create(&self, name: &str) -> Result<LocalDataset, DatasetError> {
        let dir = self.root.join(name);
        if dir.exists() {
            return Err(DatasetError::AlreadyExists { path: dir });
        }
        let files_dir = dir.join(FILES_DIR);
        fs::create_dir_all(&files_dir).map_err(DatasetError::at(&files_dir))?;

        let dataset = LocalDataset {
            dir,
            record: DatasetRecord {
                id: format!("local:{name}"),
                name: name.to_string(),
                ..Default::default()
            },
        };
        dataset.save()?;
        info!("Created dataset '{}' in {}", name, self.root.display());
        Ok(dataset)
    }
}

#[derive(Clone, Debug)]
pub struct LocalDataset {
    dir: PathBuf,
    record: DatasetRecord,
}

impl LocalDataset {
    pub fn record(&self) -> &DatasetRecord {
        &self.record
    }

    pub fn files_dir(&self) -> PathBuf {
        self.dir.join(FILES_DIR)
    }

    fn ensure_open(&self) -> Result<(), DatasetError> {
        if self.record.finalized {
            return Err(DatasetError::config(format!(
                "dataset '{}' is finalized and can no longer be modified",
                self.record.name
            )));
        }
        Ok(())
    }

    fn save(&self) -> Result<(), DatasetError> {
        let path = self.dir.join(RECORD_FILE);
        let data = serde_json::to_vec_pretty(&self.record).map_err(|source| {
            DatasetError::RegistryRecord {
                path: path.clone(),
                source,
            }
        })?;
        write_atomically(&path, &data)
    }

    fn copy_file(&mut self, from: &Path, rel: PathBuf) -> Result<(), DatasetError> {
        let to = self.files_dir().join(&rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(DatasetError::at(parent))?;
        }
        fs::copy(from, &to).map_err(DatasetError::at(from))?;
        if !self.record.files.contains(&rel) {
            self.record.files.push(rel);
        }
        Ok(())
    }
}

impl TrackedDataset for LocalDataset {
    fn id(&self) -> &str {
        &self.record.id
    }

    fn is_finalized(&self) -> bool {
        self.record.finalized
    }

    fn add_files(&mut self, path: &Path) -> Result<(), DatasetError> {
        self.ensure_open()?;
        let name = path.file_name().map(PathBuf::from).ok_or_else(|| {
            DatasetError::config(format!("'{}' does not name a file", path.display()))
        })?;

        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(|source| DatasetError::Walk {
                    path: path.to_path_buf(),
                    source,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(path)
                    .map(|rel| name.join(rel))
                    .unwrap_or_else(|_| name.join(entry.file_name()));
                self.copy_file(entry.path(), rel)?;
            }
        } else {
            self.copy_file(path, name)?;
        }

        self.save()
    }

    fn set_metadata(&mut self, metadata: BTreeMap<String, Value>) -> Result<(), DatasetError> {
        self.ensure_open()?;
        self.record.metadata.extend(metadata);
        self.save()
    }

    fn finalize(&mut self) -> Result<(), DatasetError> {
        self.ensure_open()?;
        self.record.finalized = true;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::Split;

    fn built_dataset(root: &Path) -> (PathBuf, PathBuf) {
        let dir = root.join("widgets");
        fs::create_dir_all(dir.join("images/train")).unwrap();
        fs::create_dir_all(dir.join("labels/train")).unwrap();
        fs::write(dir.join("images/train/ui_0.jpg"), b"jpeg").unwrap();
        fs::write(dir.join("labels/train/ui_0.txt"), "2 0.5 0.5 0.1 0.1\n").unwrap();
        let manifest = root.join("widgets.yaml");
        fs::write(&manifest, "path: ./widgets\n").unwrap();
        (dir, manifest)
    }

    #[test]
    fn upload_copies_files_and_finalizes() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (dir, manifest) = built_dataset(temp.path());
        let registry = LocalRegistry::new(temp.path().join("registry"));
        let mut counts = SplitCounts::default();
        counts.add(Split::Train);
        let classes = ClassTable::new(["button"]).unwrap();

        let dataset = upload_dataset(
            &registry,
            "widgets",
            &dir,
            &manifest,
            dataset_metadata(&classes, &counts),
        )
        .expect("upload");

        assert_eq!(dataset.id(), "local:widgets");
        assert!(dataset.is_finalized());
        let files = dataset.files_dir();
        assert!(files.join("widgets/images/train/ui_0.jpg").is_file());
        assert!(files.join("widgets/labels/train/ui_0.txt").is_file());
        assert!(files.join("widgets.yaml").is_file());

        let reloaded = registry.get("widgets").unwrap().expect("record exists");
        assert_eq!(reloaded.record(), dataset.record());
        assert_eq!(reloaded.record().files.len(), 3);
        assert_eq!(reloaded.record().metadata["splits"]["train"], json!(1));
        assert_eq!(reloaded.record().metadata["class_names"], json!(["button"]));
    }

    #[test]
    fn finalized_dataset_rejects_changes() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (_, manifest) = built_dataset(temp.path());
        let registry = LocalRegistry::new(temp.path().join("registry"));

        let mut dataset = registry.create("widgets").unwrap();
        dataset.finalize().unwrap();

        assert!(matches!(
            dataset.add_files(&manifest),
            Err(DatasetError::Configuration { .. })
        ));
        assert!(matches!(
            dataset.set_metadata(BTreeMap::new()),
            Err(DatasetError::Configuration { .. })
        ));
    }

    #[test]
    fn upload_refuses_a_finalized_dataset_and_reuses_an_open_one() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (dir, manifest) = built_dataset(temp.path());
        let registry = LocalRegistry::new(temp.path().join("registry"));

        let mut open = registry.create("draft").unwrap();
        open.set_metadata(BTreeMap::from([("owner".to_string(), json!("ci"))]))
            .unwrap();
        let uploaded = upload_dataset(&registry, "draft", &dir, &manifest, BTreeMap::new())
            .expect("reuse open dataset");
        assert_eq!(uploaded.record().metadata["owner"], json!("ci"));

        let err = upload_dataset(&registry, "draft", &dir, &manifest, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, DatasetError::AlreadyExists { .. }));
    }

    #[test]
    fn corrupt_record_is_reported() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let dir = temp.path().join("widgets");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(RECORD_FILE), "{not json").unwrap();

        let err = LocalRegistry::new(temp.path()).get("widgets").unwrap_err();
        assert!(matches!(err, DatasetError::RegistryRecord { .. }));
    }
}
