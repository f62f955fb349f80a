//! Typed pipeline configuration.
//!
//! Every recognized option is a field with a default; unknown keys in a YAML
//! config file are rejected when it is loaded.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::DatasetError;
use crate::label::ClassTable;
use crate::split::SplitRatio;

/// Post-processing passes applied to freshly assembled label files.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixes {
    #[serde(default)]
    pub class_replace: Option<ClassReplace>,
    #[serde(default)]
    pub normalize_bbox: Option<NormalizeBbox>,
}

/// Replace class names with their index in `class_names`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassReplace {
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
}

/// Divide pixel boxes by a fixed image size, or by each label's own image.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeBbox {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub from_images: bool,
}

/// Where bbox normalization takes its image size from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BboxSource {
    Fixed { width: u32, height: u32 },
    FromImages,
}

/// Validated form of [`Fixes`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FixPlan {
    pub classes: Option<ClassTable>,
    pub bbox: Option<BboxSource>,
}

impl FixPlan {
    pub fn is_empty(&self) -> bool {
        self.classes.is_none() && self.bbox.is_none()
    }
}

impl Fixes {
    /// Check that every configured fix has the parameters it needs.
    pub fn plan(&self) -> Result<FixPlan, DatasetError> {
        let classes = match &self.class_replace {
            None => None,
            Some(ClassReplace { class_names: None }) => {
                return Err(DatasetError::config(
                    "class names must be provided to replace the class names",
                ));
            }
            Some(ClassReplace {
                class_names: Some(names),
            }) => {
                if names.is_empty() {
                    return Err(DatasetError::config(
                        "class names must be provided to replace the class names",
                    ));
                }
                Some(ClassTable::new(names.iter().cloned())?)
            }
        };

        let bbox = match &self.normalize_bbox {
            None => None,
            Some(NormalizeBbox {
                from_images: true,
                width: None,
                height: None,
            }) => Some(BboxSource::FromImages),
            Some(NormalizeBbox {
                from_images: true, ..
            }) => {
                return Err(DatasetError::config(
                    "normalize_bbox takes either width and height or from_images, not both",
                ));
            }
            Some(NormalizeBbox {
                width: Some(width),
                height: Some(height),
                ..
            }) => {
                if *width == 0 || *height == 0 {
                    return Err(DatasetError::config(format!(
                        "width and height must be positive to normalize bounding boxes, got {width}x{height}"
                    )));
                }
                Some(BboxSource::Fixed {
                    width: *width,
                    height: *height,
                })
            }
            Some(_) => {
                return Err(DatasetError::config(
                    "width and height must be provided to normalize the bounding boxes",
                ));
            }
        };

        Ok(FixPlan { classes, bbox })
    }
}

/// Options recognized by [`crate::dataset::assemble`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssembleOptions {
    /// Remove an existing dataset directory instead of failing.
    pub clean: bool,
    pub split_ratio: SplitRatio,
    /// Seed for a reproducible split; random when unset.
    pub seed: Option<u64>,
    pub fixes: Fixes,
}

/// Pipeline settings loadable from a YAML file.
///
/// Command-line flags take precedence over values read from the file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub dataset: Option<String>,
    pub output_folder: Option<PathBuf>,
    /// Class table written to the manifest; the widget table when unset.
    pub classes: Option<Vec<String>>,
    pub clean: bool,
    pub split_ratio: Option<SplitRatio>,
    pub seed: Option<u64>,
    pub fixes: Fixes,
    pub datalist: Option<PathBuf>,
    pub continue_on_error: bool,
    pub delay_ms: u64,
    pub capture_output: bool,
    pub upload_to: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let data = fs::read_to_string(path).map_err(DatasetError::at(path))?;
        serde_yaml::from_str(&data).map_err(|source| DatasetError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            clean: self.clean,
            split_ratio: self.split_ratio.unwrap_or_default(),
            seed: self.seed,
            fixes: self.fixes.clone(),
        }
    }

    /// The manifest class table: the configured classes or the widget table.
    pub fn class_table(&self) -> Result<ClassTable, DatasetError> {
        match &self.classes {
            Some(names) => ClassTable::new(names.iter().cloned()),
            None => Ok(ClassTable::widgets()),
        }
    }
}
