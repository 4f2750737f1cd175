//! ラベルエンコーダとone-hot変換
//!
//! クラス順序はソート済みの一意ラベル。one-hot・クラス重み・評価レポートの
//! すべてで同じインスタンスを使い回すこと。

use serde::{Deserialize, Serialize};

use super::error::DataError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// ラベル集合からクラス順序を決める
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// 保存済みのクラス順序から復元
    pub fn from_classes(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>, DataError> {
        labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                self.classes
                    .binary_search_by(|c| c.as_str().cmp(label))
                    .map_err(|_| DataError::UnknownLabel(label.to_string()))
            })
            .collect()
    }

    pub fn inverse_transform(&self, indices: &[usize]) -> Option<Vec<String>> {
        indices
            .iter()
            .map(|&i| self.classes.get(i).cloned())
            .collect()
    }
}

/// クラスインデックスをone-hotベクトルに変換
///
/// `num_classes` 以上のインデックスはすべて0の行になる。
pub fn to_categorical(indices: &[usize], num_classes: usize) -> Vec<Vec<f32>> {
    indices
        .iter()
        .map(|&index| {
            let mut row = vec![0.0; num_classes];
            if let Some(slot) = row.get_mut(index) {
                *slot = 1.0;
            }
            row
        })
        .collect()
}
