//! YOLO label lines and the class table used to rewrite them.
//!
//! A label line reads `<class> <x_center> <y_center> <width> <height>`. The
//! class token is a widget name straight out of the renderer and becomes an
//! integer index after class substitution; the coordinates are pixels until
//! bbox normalization divides them by the image size.

mod rewrite;

pub use rewrite::{normalize_bboxes, replace_class_names, RewriteStats};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::DatasetError;

/// Widget types understood by the UI renderer, in class-index order.
pub const WIDGET_TYPES: [&str; 29] = [
    "arc",
    "bar",
    "button",
    "buttonmatrix",
    "calendar",
    "chart",
    "checkbox",
    "dropdown",
    "image",
    "imagebutton",
    "keyboard",
    "label",
    "led",
    "line",
    "list",
    "menu",
    "messagebox",
    "roller",
    "scale",
    "slider",
    "spangroup",
    "spinbox",
    "spinner",
    "switch",
    "table",
    "tabview",
    "textarea",
    "tileview",
    "window",
];

/// Ordered class names with dense indices `0..N-1`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassTable {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ClassTable {
    /// Build a table from names in index order.
    ///
    /// Names must be non-empty, free of whitespace and unique.
    pub fn new<I, S>(names: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut lookup = HashMap::with_capacity(names.len());

        for (index, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(DatasetError::config(format!(
                    "class name at index {index} is empty"
                )));
            }
            if name.chars().any(char::is_whitespace) {
                return Err(DatasetError::config(format!(
                    "class name '{name}' contains whitespace and can never match a label token"
                )));
            }
            if let Some(first) = lookup.insert(name.clone(), index) {
                return Err(DatasetError::config(format!(
                    "duplicate class name '{name}' at indices {first} and {index}"
                )));
            }
        }

        Ok(Self { names, lookup })
    }

    /// The renderer's full widget table.
    pub fn widgets() -> Self {
        let names: Vec<String> = WIDGET_TYPES.iter().map(|name| name.to_string()).collect();
        let lookup = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();
        Self { names, lookup }
    }

    /// Build a table from an index -> name mapping, requiring dense indices.
    pub fn from_index_map(map: &BTreeMap<usize, String>) -> Result<Self, DatasetError> {
        for (expected, index) in map.keys().enumerate() {
            if *index != expected {
                return Err(DatasetError::config(format!(
                    "class indices must be dense starting at 0; missing index {expected}"
                )));
            }
        }
        Self::new(map.values().cloned())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The `names` table as written into a dataset manifest.
    pub fn to_index_map(&self) -> BTreeMap<usize, String> {
        self.names.iter().cloned().enumerate().collect()
    }
}

/// One parsed `class x y w h` row.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationLine {
    pub class: String,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

/// Why a label line could not be parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum LineError {
    TooFewTokens(usize),
    InvalidNumber { field: &'static str, raw: String },
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::TooFewTokens(found) => write!(f, "expected 5 tokens, found {found}"),
            LineError::InvalidNumber { field, raw } => {
                write!(f, "invalid {field} '{raw}'; expected a number")
            }
        }
    }
}

impl AnnotationLine {
    /// Parse a label line. Tokens after the fifth are ignored.
    pub fn parse(line: &str) -> Result<Self, LineError> {
        // Six tokens are enough to see everything we keep.
        let tokens: Vec<&str> = line.split_whitespace().take(6).collect();
        if tokens.len() < 5 {
            return Err(LineError::TooFewTokens(tokens.len()));
        }

        Ok(Self {
            class: tokens[0].to_string(),
            x_center: parse_coord(tokens[1], "x_center")?,
            y_center: parse_coord(tokens[2], "y_center")?,
            width: parse_coord(tokens[3], "width")?,
            height: parse_coord(tokens[4], "height")?,
        })
    }

    /// Divide x/width by `img_width` and y/height by `img_height`.
    pub fn normalized(&self, img_width: f64, img_height: f64) -> Self {
        Self {
            class: self.class.clone(),
            x_center: self.x_center / img_width,
            y_center: self.y_center / img_height,
            width: self.width / img_width,
            height: self.height / img_height,
        }
    }
}

impl fmt::Display for AnnotationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.class, self.x_center, self.y_center, self.width, self.height
        )
    }
}

fn parse_coord(raw: &str, field: &'static str) -> Result<f64, LineError> {
    raw.parse::<f64>().map_err(|_| LineError::InvalidNumber {
        field,
        raw: raw.to_string(),
    })
}

/// Replace the leading class name of `line` with its index.
///
/// Returns `None` when the first token is not a known class name or is not
/// followed by whitespace; everything after the token is kept verbatim.
pub fn substitute_class(line: &str, classes: &ClassTable) -> Option<String> {
    let split_at = line.find(char::is_whitespace)?;
    let (token, rest) = line.split_at(split_at);
    let index = classes.index_of(token)?;
    Some(format!("{index}{rest}"))
}

/// Normalize the bbox of a single label line against the image size.
pub fn normalize_line(line: &str, img_width: f64, img_height: f64) -> Result<String, LineError> {
    let parsed = AnnotationLine::parse(line)?;
    Ok(parsed.normalized(img_width, img_height).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(names: &[&str]) -> ClassTable {
        ClassTable::new(names.iter().copied()).expect("valid class table")
    }

    #[test]
    fn class_table_rejects_duplicates_and_blank_names() {
        assert!(ClassTable::new(["button", "label", "button"]).is_err());
        assert!(ClassTable::new(["button", ""]).is_err());
        assert!(ClassTable::new(["text area"]).is_err());
    }

    #[test]
    fn widget_table_indices_match_renderer_order() {
        let widgets = ClassTable::widgets();
        assert_eq!(widgets.len(), 29);
        assert_eq!(widgets.index_of("arc"), Some(0));
        assert_eq!(widgets.index_of("button"), Some(2));
        assert_eq!(widgets.index_of("window"), Some(28));
        assert_eq!(widgets.name(11), Some("label"));
        assert_eq!(ClassTable::new(WIDGET_TYPES).expect("valid table"), widgets);
    }

    #[test]
    fn index_map_round_trips_and_requires_dense_keys() {
        let classes = table(&["button", "label"]);
        let map = classes.to_index_map();
        assert_eq!(ClassTable::from_index_map(&map).expect("dense"), classes);

        let sparse: BTreeMap<usize, String> =
            [(0, "a".to_string()), (2, "b".to_string())].into_iter().collect();
        assert!(ClassTable::from_index_map(&sparse).is_err());
    }

    #[test]
    fn substitutes_leading_class_name() {
        let classes = table(&["button", "label"]);
        assert_eq!(
            substitute_class("button 0.1 0.2 0.3 0.4", &classes).as_deref(),
            Some("0 0.1 0.2 0.3 0.4")
        );
        assert_eq!(
            substitute_class("label\t1 2 3 4", &classes).as_deref(),
            Some("1\t1 2 3 4")
        );
    }

    #[test]
    fn substitution_is_a_no_op_the_second_time() {
        let classes = table(&["button", "label"]);
        let once = substitute_class("button 0.1 0.2 0.3 0.4", &classes).expect("first pass");
        assert_eq!(substitute_class(&once, &classes), None);
    }

    #[test]
    fn substitution_matches_whole_tokens_only() {
        let classes = table(&["button", "buttonmatrix"]);
        assert_eq!(
            substitute_class("buttonmatrix 1 2 3 4", &classes).as_deref(),
            Some("1 1 2 3 4")
        );
        assert_eq!(substitute_class("buttons 1 2 3 4", &classes), None);
        assert_eq!(substitute_class("button", &classes), None);
    }

    #[test]
    fn normalizes_pixel_box() {
        let out = normalize_line("3 100 50 20 30", 200.0, 100.0).expect("normalize");
        assert_eq!(out, "3 0.5 0.5 0.1 0.3");
    }

    #[test]
    fn normalization_drops_extra_tokens() {
        let out = normalize_line("button 10 10 10 10 0.9", 20.0, 20.0).expect("normalize");
        assert_eq!(out, "button 0.5 0.5 0.5 0.5");
    }

    #[test]
    fn parse_reports_short_and_non_numeric_lines() {
        assert_eq!(
            AnnotationLine::parse("0 1 2"),
            Err(LineError::TooFewTokens(3))
        );
        assert!(matches!(
            AnnotationLine::parse("0 1 two 3 4"),
            Err(LineError::InvalidNumber { field: "y_center", .. })
        ));
    }
}
