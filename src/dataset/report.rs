//! Assembly report types for tracking per-file outcomes.
//!
//! Per-file failures never abort a build; they are collected here and the
//! final error count is what the operator sees.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::label::RewriteStats;
use crate::split::Split;

/// Pairs placed into each split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitCounts {
    pub fn add(&mut self, split: Split) {
        match split {
            Split::Train => self.train += 1,
            Split::Val => self.val += 1,
            Split::Test => self.test += 1,
        }
    }

    pub fn get(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Val => self.val,
            Split::Test => self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }
}

/// Pipeline stage an issue was recorded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStage {
    Capture,
    Move,
    Walk,
    ClassReplace,
    NormalizeBbox,
}

impl fmt::Display for IssueStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueStage::Capture => "capture",
            IssueStage::Move => "move",
            IssueStage::Walk => "walk",
            IssueStage::ClassReplace => "class-replace",
            IssueStage::NormalizeBbox => "normalize-bbox",
        };
        f.write_str(name)
    }
}

/// One failed per-file operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssemblyIssue {
    pub stage: IssueStage,
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of a dataset build or a standalone fix run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AssemblyReport {
    /// Dataset name, empty for standalone fix runs.
    pub dataset: String,
    pub placed: SplitCounts,
    /// Label files every configured fix succeeded on.
    pub files_fixed: usize,
    /// Line counts summed over all fix passes.
    pub lines: RewriteStats,
    pub issues: Vec<AssemblyIssue>,
}

impl AssemblyReport {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, stage: IssueStage, path: impl Into<PathBuf>, message: impl fmt::Display) {
        self.issues.push(AssemblyIssue {
            stage,
            path: path.into(),
            message: message.to_string(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.issues.len()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for AssemblyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.dataset.is_empty() {
            writeln!(
                f,
                "Dataset '{}': {} train, {} val, {} test",
                self.dataset, self.placed.train, self.placed.val, self.placed.test
            )?;
        }

        if self.files_fixed > 0 || self.lines.lines > 0 {
            writeln!(
                f,
                "  fixed {} label file(s): {} line(s) rewritten, {} malformed line(s) skipped",
                self.files_fixed, self.lines.rewritten, self.lines.skipped
            )?;
        }

        if !self.issues.is_empty() {
            writeln!(f)?;
            writeln!(f, "Errors ({}):", self.issues.len())?;
            for issue in &self.issues {
                writeln!(
                    f,
                    "  - [{}] {}: {}",
                    issue.stage,
                    issue.path.display(),
                    issue.message
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_counts_and_issues() {
        let mut report = AssemblyReport::new("widgets");
        report.placed.add(Split::Train);
        report.placed.add(Split::Test);
        report.record(IssueStage::Move, "tmp/ui_3.jpg", "missing");

        let text = report.to_string();
        assert!(text.contains("Dataset 'widgets': 1 train, 0 val, 1 test"));
        assert!(text.contains("Errors (1):"));
        assert!(text.contains("[move] tmp/ui_3.jpg: missing"));
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.placed.total(), 2);
    }

    #[test]
    fn serializes_stage_in_snake_case() {
        let mut report = AssemblyReport::new("w");
        report.record(IssueStage::NormalizeBbox, "a.txt", "bad");
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"stage\":\"normalize_bbox\""));
    }
}
