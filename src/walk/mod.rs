//! Lazy discovery of label files across directory trees.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::DatasetError;

/// Directory names skipped by the standalone `fix` command.
pub const DEFAULT_SKIP_DIRS: [&str; 1] = ["rico"];

/// Split list files that share the label extension but are not labels.
pub const DEFAULT_SKIP_FILES: [&str; 3] = ["train.txt", "val.txt", "test.txt"];

pub const LABEL_EXTENSION: &str = "txt";

/// Enumerates files under one or more roots.
///
/// [`FileWalker::files`] returns a fresh lazy iterator each call, so a walker
/// can be reused to restart the enumeration. Skipped directories are pruned
/// before descending into them.
#[derive(Clone, Debug, Default)]
pub struct FileWalker {
    roots: Vec<PathBuf>,
    skip_dirs: Vec<String>,
    skip_files: Vec<String>,
    extensions: Vec<String>,
    follow_links: bool,
}

impl FileWalker {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// A walker that yields `.txt` label files.
    pub fn labels<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(roots).with_extensions([LABEL_EXTENSION])
    }

    pub fn skip_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_dirs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn skip_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_files.extend(names.into_iter().map(Into::into));
        self
    }

    /// Only yield files with one of these extensions (case-insensitive).
    /// With no extensions every file matches.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions
            .extend(extensions.into_iter().map(Into::into));
        self
    }

    /// Follow symbolic links. Off by default; walkdir reports link loops as
    /// errors when enabled.
    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Lazily enumerate matching files.
    ///
    /// Traversal failures are yielded as `Err` items so the caller can
    /// record them and keep going.
    pub fn files(&self) -> impl Iterator<Item = Result<PathBuf, DatasetError>> + '_ {
        self.roots.iter().flat_map(move |root| {
            WalkDir::new(root)
                .follow_links(self.follow_links)
                .into_iter()
                .filter_entry(move |entry| !self.is_skipped_dir(entry))
                .filter_map(move |entry| match entry {
                    Ok(entry) => {
                        if entry.file_type().is_file() && self.accepts(entry.path()) {
                            debug!("Found {}", entry.path().display());
                            Some(Ok(entry.into_path()))
                        } else {
                            None
                        }
                    }
                    Err(source) => Some(Err(DatasetError::Walk {
                        path: root.clone(),
                        source,
                    })),
                })
        })
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && name_in(entry.file_name(), &self.skip_dirs)
    }

    fn accepts(&self, path: &Path) -> bool {
        if path
            .file_name()
            .is_some_and(|name| name_in(name, &self.skip_files))
        {
            return false;
        }

        if self.extensions.is_empty() {
            return true;
        }

        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    }
}

fn name_in(name: &OsStr, names: &[String]) -> bool {
    names.iter().any(|candidate| OsStr::new(candidate) == name)
}
