//! モデルメタデータの定義
//!
//! tar.gz 内の `metadata.json` として保存され、推論・変換時にモデルを
//! 再構築するための情報を持ちます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::{Architecture, ModelConfig, TrainingHistory};
use crate::model::config::TrainingSettings;

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（LabelEncoder の順序）
    /// 例: ["not_smiling", "smiling"]
    pub class_labels: Vec<String>,

    /// ネットワーク構成
    pub architecture: Architecture,

    /// 入力画像の幅・高さ・チャネル数
    pub image_width: usize,
    pub image_height: usize,
    pub channels: usize,

    /// 学習設定
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub test_size: f64,

    /// クラス重み（class_labels と同じ順序）
    pub class_weights: Vec<f32>,

    pub train_samples: usize,
    pub test_samples: usize,

    /// エポックごとの学習履歴
    #[serde(default)]
    pub history: TrainingHistory,

    /// モデルの学習時刻（RFC 3339）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成（学習時刻は現在時刻）
    pub fn new(
        class_labels: Vec<String>,
        model_config: &ModelConfig,
        settings: &TrainingSettings,
        class_weights: Vec<f32>,
        train_samples: usize,
        test_samples: usize,
        history: TrainingHistory,
    ) -> Self {
        Self {
            class_labels,
            architecture: model_config.architecture,
            image_width: model_config.image_width,
            image_height: model_config.image_height,
            channels: model_config.channels,
            num_epochs: settings.num_epochs,
            batch_size: settings.batch_size,
            learning_rate: settings.learning_rate,
            seed: settings.seed,
            test_size: settings.test_size,
            class_weights,
            train_samples,
            test_samples,
            history,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 保存時と同じモデル設定を復元
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.class_labels.len())
            .with_architecture(self.architecture)
            .with_image_height(self.image_height)
            .with_image_width(self.image_width)
            .with_channels(self.channels)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
