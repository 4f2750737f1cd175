//! クラス不均衡を補正する重み（出現頻度の逆数）

use serde::{Deserialize, Serialize};

use super::error::DataError;

/// クラスインデックス -> 重み
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: Vec<f32>,
}

impl ClassWeights {
    /// クラスごとの件数から重みを計算する: max(count) / count[i]
    ///
    /// `class_names` はエラーメッセージ用で、`counts` と同じ順序であること。
    pub fn from_counts(counts: &[usize], class_names: &[String]) -> Result<Self, DataError> {
        let max = counts.iter().copied().max().unwrap_or(0);

        let weights = counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                if count == 0 {
                    return Err(DataError::TooFewSamples {
                        class: class_names
                            .get(i)
                            .cloned()
                            .unwrap_or_else(|| i.to_string()),
                        count,
                        required: 1,
                    });
                }
                Ok(max as f32 / count as f32)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { weights })
    }

    /// one-hot行列の列和から重みを計算する
    pub fn from_one_hot(rows: &[Vec<f32>], class_names: &[String]) -> Result<Self, DataError> {
        let num_classes = rows.first().map(|r| r.len()).unwrap_or(class_names.len());
        let mut counts = vec![0usize; num_classes];
        for row in rows {
            for (count, &value) in counts.iter_mut().zip(row) {
                if value > 0.5 {
                    *count += 1;
                }
            }
        }
        Self::from_counts(&counts, class_names)
    }

    /// 全クラス同じ重み（検証用）
    pub fn uniform(num_classes: usize) -> Self {
        Self {
            weights: vec![1.0; num_classes],
        }
    }

    pub fn get(&self, class_index: usize) -> f32 {
        self.weights.get(class_index).copied().unwrap_or(1.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }
}
