//! 層化（stratified）学習/テスト分割
//!
//! テスト件数は `ceil(test_size * n)`。各クラスへの割り当ては比例配分の
//! 切り捨て分を端数の大きい順に補う（同値はクラス番号順）。
//! 乱数は `StdRng::seed_from_u64(seed)` のみを使うため、同じ入力と
//! シードからは常に同じ分割が得られる。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::error::DataError;

/// テスト割合の既定値
pub const DEFAULT_TEST_SIZE: f64 = 0.20;
/// 乱数シードの既定値
pub const DEFAULT_SEED: u64 = 42;

/// 分割結果（元データセットのインデックス）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// ラベル（クラスインデックス）列を層化分割する
///
/// `class_names` はクラス数とエラーメッセージに使う。
pub fn stratified_split(
    labels: &[usize],
    class_names: &[String],
    test_size: f64,
    seed: u64,
) -> Result<TrainTestSplit, DataError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(DataError::InvalidTestSize(test_size));
    }

    let num_classes = class_names.len().max(labels.iter().map(|&l| l + 1).max().unwrap_or(0));
    let class_name = |i: usize| class_names.get(i).cloned().unwrap_or_else(|| i.to_string());

    let mut per_class: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
    for (index, &label) in labels.iter().enumerate() {
        per_class[label].push(index);
    }

    for (class, members) in per_class.iter().enumerate() {
        if members.len() < 2 {
            return Err(DataError::TooFewSamples {
                class: class_name(class),
                count: members.len(),
                required: 2,
            });
        }
    }

    let n = labels.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n - n_test;

    if n_test < num_classes {
        return Err(DataError::SplitTooSmall {
            split: "test",
            size: n_test,
            classes: num_classes,
        });
    }
    if n_train < num_classes {
        return Err(DataError::SplitTooSmall {
            split: "train",
            size: n_train,
            classes: num_classes,
        });
    }

    let counts: Vec<usize> = per_class.iter().map(|m| m.len()).collect();
    let test_allocation = allocate(&counts, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);

    for (members, &n_class_test) in per_class.iter_mut().zip(&test_allocation) {
        members.shuffle(&mut rng);
        let (class_test, class_train) = members.split_at(n_class_test);
        test.extend_from_slice(class_test);
        train.extend_from_slice(class_train);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok(TrainTestSplit { train, test })
}

/// `total` 件をクラス件数に比例して配分する（最大剰余法）
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    if n == 0 {
        return vec![0; counts.len()];
    }

    let exact: Vec<f64> = counts
        .iter()
        .map(|&c| c as f64 * total as f64 / n as f64)
        .collect();
    let mut allocation: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut remaining = total.saturating_sub(allocation.iter().sum());
    for &class in order.iter().cycle() {
        if remaining == 0 {
            break;
        }
        if allocation[class] < counts[class] {
            allocation[class] += 1;
            remaining -= 1;
        }
    }

    allocation
}
