//! COCO detection JSON from a YOLO split.
//!
//! Every label file in `labels/<split>` becomes one image entry, measured
//! from its image in `images/<split>`, and each normalized box becomes an
//! annotation in absolute `[x_min, y_min, width, height]` pixels. Ids start
//! at 1.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomically;
use crate::dataset::{find_image, read_image_dimensions};
use crate::error::DatasetError;
use crate::label::{AnnotationLine, ClassTable};
use crate::walk::LABEL_EXTENSION;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: usize,
    pub bbox: [f64; 4], // [x, y, width, height]
    pub area: f64,
    pub segmentation: Vec<Vec<f64>>,
    pub iscrowd: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoFile {
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
    pub categories: Vec<Category>,
}

/// A converted split plus the label lines that could not be used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CocoExport {
    pub coco: CocoFile,
    pub skipped_lines: usize,
}

/// Convert the normalized labels in `labels_dir` to COCO.
///
/// Categories are the whole class table. Lines that do not parse, or whose
/// class is not an index into `classes`, are skipped and counted. A label
/// without an image is an error since its boxes cannot be scaled.
pub fn yolo_to_coco(
    labels_dir: &Path,
    images_dir: &Path,
    classes: &ClassTable,
) -> Result<CocoExport, DatasetError> {
    let mut export = CocoExport {
        coco: CocoFile {
            categories: classes
                .names()
                .iter()
                .enumerate()
                .map(|(id, name)| Category {
                    id,
                    name: name.clone(),
                })
                .collect(),
            ..Default::default()
        },
        skipped_lines: 0,
    };

    for (image_id, label_path) in (1..).zip(label_files(labels_dir)?) {
        let stem = label_path.file_stem().map(PathBuf::from).unwrap_or_default();
        let image_path = find_image(images_dir, &stem).ok_or_else(|| {
            DatasetError::config(format!(
                "no image in {} for label {}",
                images_dir.display(),
                label_path.display()
            ))
        })?;
        let (width, height) = read_image_dimensions(&image_path)?;

        export.coco.images.push(Image {
            id: image_id,
            file_name: image_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            width,
            height,
        });

        let text = fs::read_to_string(&label_path).map_err(DatasetError::at(&label_path))?;
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let parsed = AnnotationLine::parse(line).map_err(|err| err.to_string());
            let category = parsed.and_then(|parsed| match parsed.class.parse::<usize>() {
                Ok(id) if id < classes.len() => Ok((id, parsed)),
                _ => Err(format!("unknown class '{}'", parsed.class)),
            });
            let (category_id, bbox) = match category {
                Ok(found) => found,
                Err(reason) => {
                    warn!("Skipping '{line}' in {}: {reason}", label_path.display());
                    export.skipped_lines += 1;
                    continue;
                }
            };

            let (w, h) = (f64::from(width), f64::from(height));
            let box_width = bbox.width * w;
            let box_height = bbox.height * h;
            export.coco.annotations.push(Annotation {
                id: export.coco.annotations.len() as u64 + 1,
                image_id,
                category_id,
                bbox: [
                    (bbox.x_center - bbox.width / 2.0) * w,
                    (bbox.y_center - bbox.height / 2.0) * h,
                    box_width,
                    box_height,
                ],
                area: box_width * box_height,
                segmentation: Vec::new(),
                iscrowd: 0,
            });
        }
    }

    Ok(export)
}

/// Write `coco` as pretty JSON, creating parent directories.
pub fn write_coco(coco: &CocoFile, path: &Path) -> Result<(), DatasetError> {
    let data = serde_json::to_vec_pretty(coco).map_err(|source| DatasetError::CocoWrite {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(DatasetError::at(parent))?;
    }
    write_atomically(path, &data)?;
    info!(
        "Wrote {} image(s) and {} annotation(s) to {}",
        coco.images.len(),
        coco.annotations.len(),
        path.display()
    );
    Ok(())
}

fn label_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(DatasetError::at(dir))? {
        let path = entry.map_err(DatasetError::at(dir))?.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LABEL_EXTENSION))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
