//! File-level label passes.
//!
//! Each pass reads the whole file, transforms it line by line and replaces
//! the file atomically. Malformed lines are left untouched and counted.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use super::{normalize_line, substitute_class, ClassTable};
use crate::atomic::write_atomically;
use crate::error::DatasetError;

/// Line counts from one pass over one file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// Non-blank lines seen.
    pub lines: usize,
    /// Lines whose contents changed.
    pub rewritten: usize,
    /// Malformed lines left as they were.
    pub skipped: usize,
}

impl RewriteStats {
    pub fn merge(&mut self, other: RewriteStats) {
        self.lines += other.lines;
        self.rewritten += other.rewritten;
        self.skipped += other.skipped;
    }
}

enum LineOutcome {
    Keep,
    Replace(String),
    Malformed,
}

/// Replace class names at the start of each line with their index.
///
/// Lines whose first token is not a class name (for instance because they
/// were already rewritten) are kept as they are.
pub fn replace_class_names(path: &Path, classes: &ClassTable) -> Result<RewriteStats, DatasetError> {
    debug!("Replacing class names in {}", path.display());
    rewrite_lines(path, |_, line| match substitute_class(line, classes) {
        Some(replaced) => LineOutcome::Replace(replaced),
        None => LineOutcome::Keep,
    })
}

/// Divide pixel bbox coordinates by the image size.
///
/// Lines with fewer than five tokens or non-numeric coordinates are logged
/// and skipped; the remaining lines of the file are still normalized.
pub fn normalize_bboxes(
    path: &Path,
    img_width: u32,
    img_height: u32,
) -> Result<RewriteStats, DatasetError> {
    if img_width == 0 || img_height == 0 {
        return Err(DatasetError::config(format!(
            "image size must be positive to normalize bounding boxes, got {img_width}x{img_height}"
        )));
    }

    debug!(
        "Normalizing {} against {}x{}",
        path.display(),
        img_width,
        img_height
    );
    let (width, height) = (img_width as f64, img_height as f64);
    rewrite_lines(path, |line_num, line| {
        match normalize_line(line, width, height) {
            Ok(normalized) => LineOutcome::Replace(normalized),
            Err(err) => {
                warn!(
                    "Invalid line #{} in {}: {} ({})",
                    line_num,
                    path.display(),
                    line,
                    err
                );
                LineOutcome::Malformed
            }
        }
    })
}

fn rewrite_lines<F>(path: &Path, mut transform: F) -> Result<RewriteStats, DatasetError>
where
    F: FnMut(usize, &str) -> LineOutcome,
{
    let content = fs::read_to_string(path).map_err(DatasetError::at(path))?;

    let mut stats = RewriteStats::default();
    let mut output = String::with_capacity(content.len());

    for (line_idx, line) in content.lines().enumerate() {
        if line_idx > 0 {
            output.push('\n');
        }

        if line.trim().is_empty() {
            output.push_str(line);
            continue;
        }

        stats.lines += 1;
        match transform(line_idx + 1, line) {
            LineOutcome::Replace(new_line) if new_line != line => {
                stats.rewritten += 1;
                output.push_str(&new_line);
            }
            LineOutcome::Replace(_) | LineOutcome::Keep => output.push_str(line),
            LineOutcome::Malformed => {
                stats.skipped += 1;
                output.push_str(line);
            }
        }
    }

    if content.ends_with('\n') {
        output.push('\n');
    }

    if output != content {
        write_atomically(path, output.as_bytes())?;
    }

    Ok(stats)
}
