//! Whole-file replacement through a sibling temporary file.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::DatasetError;

/// Replace the contents of `path` with `contents`.
///
/// The data is written to a temporary file in the same directory and renamed
/// over `path`, so readers see either the old or the new contents. If `path`
/// already exists its permissions carry over to the replacement.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), DatasetError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(DatasetError::at(dir))?;
    tmp.write_all(contents).map_err(DatasetError::at(tmp.path()))?;
    tmp.as_file()
        .sync_all()
        .map_err(DatasetError::at(tmp.path()))?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), metadata.permissions())
            .map_err(DatasetError::at(tmp.path()))?;
    }

    tmp.persist(path).map_err(|err| DatasetError::FileIo {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    Ok(())
}
