//! Train/val/test partitioning.
//!
//! A partition is a uniformly random permutation of the input cut into three
//! contiguous slices. The first two slices get `floor(n * ratio)` items each;
//! the test slice takes whatever remains, so it absorbs all rounding slack.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Absolute tolerance used when checking that a ratio sums to one.
pub const RATIO_TOLERANCE: f64 = 1e-9;

/// One of the three dataset partitions.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// All splits in layout order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }

    /// Image directory relative to the dataset root, e.g. `images/train`.
    pub fn images_dir(&self) -> String {
        format!("images/{}", self.as_str())
    }

    /// Label directory relative to the dataset root, e.g. `labels/train`.
    pub fn labels_dir(&self) -> String {
        format!("labels/{}", self.as_str())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fractions of the input assigned to train, val and test.
///
/// Always valid once constructed: three finite, non-negative components
/// summing to one within [`RATIO_TOLERANCE`].
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Vec<f64>")]
pub struct SplitRatio {
    train: f64,
    val: f64,
    test: f64,
}

impl SplitRatio {
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self, DatasetError> {
        let parts = [train, val, test];
        if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(DatasetError::config(format!(
                "split ratio components must be finite and non-negative, got ({train}, {val}, {test})"
            )));
        }

        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(DatasetError::config(format!(
                "split ratio must sum up to 1 (e.g. 0.7,0.1,0.2), got ({train}, {val}, {test}) with sum {sum}"
            )));
        }

        Ok(Self { train, val, test })
    }

    /// Build a ratio from a slice that must hold exactly three fractions.
    pub fn from_slice(parts: &[f64]) -> Result<Self, DatasetError> {
        match parts {
            [train, val, test] => Self::new(*train, *val, *test),
            _ => Err(DatasetError::config(format!(
                "split ratio must have exactly 3 values (train, val, test), got {}",
                parts.len()
            ))),
        }
    }

    pub fn train(&self) -> f64 {
        self.train
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn test(&self) -> f64 {
        self.test
    }

    /// Slice sizes for `n` items: `(floor(n*train), floor(n*val), rest)`.
    pub fn sizes(&self, n: usize) -> (usize, usize, usize) {
        let train = ((n as f64 * self.train).floor() as usize).min(n);
        let val = ((n as f64 * self.val).floor() as usize).min(n - train);
        (train, val, n - train - val)
    }
}

impl Default for SplitRatio {
    fn default() -> Self {
        Self {
            train: 0.7,
            val: 0.1,
            test: 0.2,
        }
    }
}

impl TryFrom<Vec<f64>> for SplitRatio {
    type Error = DatasetError;

    fn try_from(parts: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_slice(&parts)
    }
}

impl FromStr for SplitRatio {
    type Err = DatasetError;

    /// Parses `train,val,test` as fractions (`0.7,0.1,0.2`) or, when the
    /// values add up to 100, as percentages (`70,10,20`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|raw| {
                raw.trim().parse::<f64>().map_err(|_| {
                    DatasetError::config(format!(
                        "invalid split ratio component '{}' in '{s}'; expected format 'train,val,test'",
                        raw.trim()
                    ))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let sum: f64 = parts.iter().sum();
        if parts.len() == 3 && (sum - 100.0).abs() <= RATIO_TOLERANCE * 100.0 {
            let fractions: Vec<f64> = parts.iter().map(|p| p / 100.0).collect();
            return Self::from_slice(&fractions);
        }

        Self::from_slice(&parts)
    }
}

impl fmt::Display for SplitRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.train, self.val, self.test)
    }
}

/// The three disjoint subsets produced by [`partition`].
#[derive(Clone, Debug, PartialEq)]
pub struct Partition<T> {
    pub train: Vec<T>,
    pub val: Vec<T>,
    pub test: Vec<T>,
}

impl<T> Partition<T> {
    pub fn get(&self, split: Split) -> &[T] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    /// Total number of items across all splits.
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the partition, yielding each split with its items.
    pub fn into_splits(self) -> [(Split, Vec<T>); 3] {
        [
            (Split::Train, self.train),
            (Split::Val, self.val),
            (Split::Test, self.test),
        ]
    }
}

/// Partition `items` using the thread-local RNG.
pub fn partition<T>(items: Vec<T>, ratio: &SplitRatio) -> Partition<T> {
    partition_with_seed(items, ratio, None)
}

/// Partition `items`, reproducibly when a seed is given.
pub fn partition_with_seed<T>(items: Vec<T>, ratio: &SplitRatio, seed: Option<u64>) -> Partition<T> {
    if let Some(seed) = seed {
        let mut rng = StdRng::seed_from_u64(seed);
        partition_with_rng(items, ratio, &mut rng)
    } else {
        let mut rng = rand::rng();
        partition_with_rng(items, ratio, &mut rng)
    }
}

/// Shuffle `items` with `rng` and cut them according to `ratio`.
pub fn partition_with_rng<T, R: Rng + ?Sized>(
    mut items: Vec<T>,
    ratio: &SplitRatio,
    rng: &mut R,
) -> Partition<T> {
    items.shuffle(rng);

    let (train_len, val_len, _) = ratio.sizes(items.len());
    let test = items.split_off(train_len + val_len);
    let val = items.split_off(train_len);

    Partition {
        train: items,
        val,
        test,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ratio_is_70_10_20() {
        let ratio = SplitRatio::default();
        assert_eq!((ratio.train(), ratio.val(), ratio.test()), (0.7, 0.1, 0.2));
    }

    #[test]
    fn rejects_ratios_that_do_not_sum_to_one() {
        let err = SplitRatio::new(0.5, 0.5, 0.5).unwrap_err();
        assert!(matches!(err, DatasetError::Configuration { .. }));
    }

    #[test]
    fn rejects_ratios_of_wrong_length() {
        let err = SplitRatio::from_slice(&[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, DatasetError::Configuration { .. }));
    }

    #[test]
    fn rejects_negative_components() {
        assert!(SplitRatio::new(1.2, -0.2, 0.0).is_err());
    }

    #[test]
    fn accepts_ratios_with_binary_rounding_noise() {
        assert!(SplitRatio::new(0.1, 0.1, 0.8).is_ok());
        assert!(SplitRatio::new(0.6, 0.3, 0.1).is_ok());
    }

    #[test]
    fn parses_fractions_and_percentages() {
        let fractions: SplitRatio = "0.8, 0.1, 0.1".parse().expect("parse fractions");
        assert_eq!(fractions, SplitRatio::new(0.8, 0.1, 0.1).unwrap());

        let percents: SplitRatio = "70,10,20".parse().expect("parse percentages");
        assert_eq!(percents, SplitRatio::default());

        assert!("70,10".parse::<SplitRatio>().is_err());
        assert!("a,b,c".parse::<SplitRatio>().is_err());
    }

    #[test]
    fn deserializes_from_yaml_sequence() {
        let ratio: SplitRatio = serde_yaml::from_str("[0.6, 0.2, 0.2]").expect("parse yaml");
        assert_eq!(ratio, SplitRatio::new(0.6, 0.2, 0.2).unwrap());
        assert!(serde_yaml::from_str::<SplitRatio>("[0.6, 0.2]").is_err());
    }

    #[test]
    fn ten_items_split_7_1_2() {
        let parts = partition((0..10).collect(), &SplitRatio::default());
        assert_eq!(parts.train.len(), 7);
        assert_eq!(parts.val.len(), 1);
        assert_eq!(parts.test.len(), 2);
    }

    #[test]
    fn test_slice_absorbs_rounding_slack() {
        let ratio = SplitRatio::new(0.34, 0.33, 0.33).unwrap();
        assert_eq!(ratio.sizes(10), (3, 3, 4));
        assert_eq!(ratio.sizes(0), (0, 0, 0));
        assert_eq!(ratio.sizes(1), (0, 0, 1));
    }

    #[test]
    fn seeded_partition_is_deterministic() {
        let ratio = SplitRatio::default();
        let a = partition_with_seed((0..50).collect::<Vec<u32>>(), &ratio, Some(42));
        let b = partition_with_seed((0..50).collect::<Vec<u32>>(), &ratio, Some(42));
        assert_eq!(a, b);
    }

    #[test]
    fn partition_keeps_every_item_once() {
        let parts = partition_with_seed((0..23).collect::<Vec<u32>>(), &SplitRatio::default(), Some(7));
        let mut all: Vec<u32> = parts
            .into_splits()
            .into_iter()
            .flat_map(|(_, items)| items)
            .collect();
        all.sort();
        assert_eq!(all, (0..23).collect::<Vec<u32>>());
    }

    #[test]
    fn split_directories_follow_yolo_layout() {
        assert_eq!(Split::Train.images_dir(), "images/train");
        assert_eq!(Split::Val.labels_dir(), "labels/val");
        assert_eq!(Split::Test.to_string(), "test");
    }
}
