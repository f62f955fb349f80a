use proptest::prelude::*;
use ui_dataset::split::{partition_with_seed, SplitRatio};

mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn partition_sizes_follow_the_ratio(
        ratio in proptest_helpers::arb_split_ratio(),
        n in 0usize..200,
        seed in any::<u64>(),
    ) {
        let parts = partition_with_seed((0..n).collect::<Vec<_>>(), &ratio, Some(seed));

        let expected_train = ((n as f64) * ratio.train()).floor() as usize;
        prop_assert_eq!(parts.train.len(), expected_train.min(n));
        prop_assert!(parts.val.len() <= ((n as f64) * ratio.val()).floor() as usize);
        prop_assert_eq!(parts.len(), n);
        prop_assert_eq!(
            (parts.train.len(), parts.val.len(), parts.test.len()),
            ratio.sizes(n)
        );
    }

    #[test]
    fn partition_keeps_every_item_exactly_once(
        ratio in proptest_helpers::arb_split_ratio(),
        items in proptest::collection::vec(0u8..8, 0..100),
        seed in any::<u64>(),
    ) {
        let parts = partition_with_seed(items.clone(), &ratio, Some(seed));

        let mut rejoined: Vec<u8> = parts
            .train
            .iter()
            .chain(&parts.val)
            .chain(&parts.test)
            .copied()
            .collect();
        rejoined.sort_unstable();
        let mut expected = items;
        expected.sort_unstable();
        prop_assert_eq!(rejoined, expected);
    }

    #[test]
    fn seeded_partitions_are_reproducible(
        ratio in proptest_helpers::arb_split_ratio(),
        n in 0usize..100,
        seed in any::<u64>(),
    ) {
        let items: Vec<usize> = (0..n).collect();
        let first = partition_with_seed(items.clone(), &ratio, Some(seed));
        let second = partition_with_seed(items, &ratio, Some(seed));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn percentages_parse_like_fractions(a in 0u32..=100, b in 0u32..=100) {
        prop_assume!(a + b <= 100);
        let c = 100 - a - b;

        let from_percent: SplitRatio = format!("{a},{b},{c}").parse().expect("valid percentages");

        prop_assert!((from_percent.train() - a as f64 / 100.0).abs() < 1e-12);
        prop_assert!((from_percent.val() - b as f64 / 100.0).abs() < 1e-12);
        prop_assert!((from_percent.test() - c as f64 / 100.0).abs() < 1e-12);
    }
}
