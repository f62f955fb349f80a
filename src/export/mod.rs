//! Exports of an assembled dataset for other training tool chains.

pub mod coco;
pub mod darknet;

pub use coco::{write_coco, yolo_to_coco, CocoExport, CocoFile};
pub use darknet::{
    export_darknet, rewrite_root, rewrite_root_paths, write_data_file, DarknetFiles, RootRewrite,
};
