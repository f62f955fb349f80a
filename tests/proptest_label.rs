use std::fs;

use proptest::prelude::*;
use ui_dataset::label::{
    normalize_bboxes, normalize_line, replace_class_names, substitute_class, AnnotationLine,
    ClassTable,
};

mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn substitution_maps_every_class_to_its_index(
        names in proptest::collection::hash_set(proptest_helpers::class_name_strategy(), 1..12),
        pick in any::<prop::sample::Index>(),
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let classes = ClassTable::new(names.iter().cloned()).expect("unique names");
        let index = pick.index(names.len());

        let line = format!("{} 1 2 3 4", names[index]);
        let replaced = substitute_class(&line, &classes).expect("known class");

        prop_assert_eq!(replaced, format!("{index} 1 2 3 4"));
    }

    #[test]
    fn class_replacement_is_idempotent(
        names in proptest::collection::hash_set(proptest_helpers::class_name_strategy(), 1..8),
        rows in proptest::collection::vec((any::<prop::sample::Index>(), 0u32..500, 0u32..500), 0..10),
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let classes = ClassTable::new(names.iter().cloned()).expect("unique names");
        let content: String = rows
            .iter()
            .map(|(pick, x, y)| format!("{} {x} {y} 5 5\n", names[pick.index(names.len())]))
            .collect();

        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("label.txt");
        fs::write(&path, &content).expect("write label");

        replace_class_names(&path, &classes).expect("first pass");
        let once = fs::read_to_string(&path).expect("read label");
        let second = replace_class_names(&path, &classes).expect("second pass");

        prop_assert_eq!(second.rewritten, 0);
        prop_assert_eq!(fs::read_to_string(&path).expect("read label"), once);
    }

    #[test]
    fn boxes_inside_the_image_normalize_into_unit_range(
        (width, height, bbox) in (1u32..2000, 1u32..2000)
            .prop_flat_map(|(w, h)| (Just(w), Just(h), proptest_helpers::arb_pixel_box(w, h))),
    ) {
        let (x, y, bw, bh) = bbox;
        let line = format!("0 {x} {y} {bw} {bh}");

        let normalized = normalize_line(&line, width as f64, height as f64).expect("valid line");
        let parsed = AnnotationLine::parse(&normalized).expect("normalized line parses");

        for value in [parsed.x_center, parsed.y_center, parsed.width, parsed.height] {
            prop_assert!((0.0..=1.0).contains(&value), "{} out of range in {}", value, normalized);
        }
        prop_assert!((parsed.x_center * width as f64 - x as f64).abs() < 1e-6);
    }

    #[test]
    fn normalizing_a_file_preserves_line_count(
        lines in proptest::collection::vec((0u32..250, 0u32..250, any::<bool>()), 0..12),
    ) {
        let content: String = lines
            .iter()
            .map(|(x, y, valid)| {
                if *valid {
                    format!("3 {x} {y} 10 10\n")
                } else {
                    format!("3 {x}\n")
                }
            })
            .collect();

        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("label.txt");
        fs::write(&path, &content).expect("write label");

        let stats = normalize_bboxes(&path, 250, 250).expect("normalize");
        let after = fs::read_to_string(&path).expect("read label");

        prop_assert_eq!(after.lines().count(), lines.len());
        prop_assert_eq!(stats.skipped, lines.iter().filter(|(_, _, valid)| !valid).count());
        prop_assert_eq!(stats.lines, lines.len());
    }
}
