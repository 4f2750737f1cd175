//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやモデル・学習設定をJSON形式で保存・読み込みします。

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::dataset::{DEFAULT_SEED, DEFAULT_TEST_SIZE};
use crate::ml::{Architecture, IMAGE_WIDTH};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    /// ネットワーク構成
    pub architecture: Architecture,
    /// 入力画像の幅（高さはアスペクト比から決まる）
    pub image_width: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            architecture: Architecture::LeNet,
            image_width: IMAGE_WIDTH,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（分割・シャッフル・重み初期化）
    pub seed: u64,
    /// テストデータの割合
    pub test_size: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 15,
            batch_size: 64,
            learning_rate: 1e-3,
            seed: DEFAULT_SEED,
            test_size: DEFAULT_TEST_SIZE,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
}

impl AppConfig {
    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// 設定ファイルを読み込む、指定がない・存在しない場合はデフォルト設定を返す
    ///
    /// ファイルが存在するのに読み込めない場合はエラー。
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let config = Self::load(path)?;
                log::info!("設定ファイルを読み込みました: {}", path.display());
                Ok(config)
            }
            Some(path) => {
                log::warn!(
                    "設定ファイルが存在しません ({})。デフォルト設定を使用します",
                    path.display()
                );
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        log::info!("計算デバイス: {}", self.device_type);
        log::info!(
            "モデル: {} (入力幅 {})",
            self.model.architecture,
            self.model.image_width
        );
        log::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}, シード: {}, テスト割合: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed,
            self.training.test_size
        );
    }
}
