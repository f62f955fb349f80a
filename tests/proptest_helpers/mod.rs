#![allow(dead_code)]

use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

use ui_dataset::split::SplitRatio;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Valid ratios: `train` in [0, 1], `val` in [0, 1 - train], `test` the rest.
pub fn arb_split_ratio() -> BoxedStrategy<SplitRatio> {
    (0u32..=1000, 0u32..=1000)
        .prop_map(|(a, b)| {
            let train = a as f64 / 1000.0;
            let val = (1.0 - train) * (b as f64 / 1000.0);
            let test = 1.0 - train - val;
            SplitRatio::new(train, val, test.max(0.0)).expect("constructed ratio is valid")
        })
        .boxed()
}

pub fn class_name_strategy() -> BoxedStrategy<String> {
    proptest::string::string_regex("[a-z]{1,12}")
        .expect("valid class name regex")
        .boxed()
}

/// A pixel box `(x, y, w, h)` inside an image of `width` x `height`.
pub fn arb_pixel_box(width: u32, height: u32) -> BoxedStrategy<(u32, u32, u32, u32)> {
    (0..=width, 0..=height, 0..=width, 0..=height).boxed()
}
