//! 学習済みモデルをモバイル向けバンドルへ変換
//!
//! バンドル構成（tar.gz内部）:
//! - manifest.json - 入力画像の形式、クラスラベル、対応OSバージョン
//! - weights.bin   - モデルの重み（burn のバイナリレコード、f16）

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, HalfPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ml::training::to_f32_vec;
use crate::ml::{restore_model, Architecture, ModelConfig, SmileNet};
use crate::model::load_model_with_metadata;
use crate::model::model_storage::{read_entry, write_archive};

pub const USAGE: &str = "Usage: convert <model_path> <output_path>";

/// バンドル形式の識別子
pub const BUNDLE_FORMAT: &str = "smile_detector.mobile.v1";

/// 入力画像の形状 (N, H, W, C)
pub const INPUT_SHAPE: [usize; 4] = [1, 28, 28, 1];

pub const MINIMUM_DEPLOYMENT_TARGET: &str = "iOS14";

const MANIFEST_ENTRY: &str = "manifest.json";
const WEIGHTS_ENTRY: &str = "weights.bin";

type ConvertBackend = NdArray<f32>;

/// 入力画像の説明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    pub name: String,
    /// (N, H, W, C)
    pub shape: [usize; 4],
    pub color_layout: String,
    /// 画素値に掛ける係数（u8 -> [0, 1]）
    pub scale: f32,
    pub bias: f32,
}

/// バンドルのマニフェスト
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileManifest {
    pub format: String,
    pub minimum_deployment_target: String,
    pub input: ImageInput,
    pub class_labels: Vec<String>,
    pub architecture: Architecture,
    pub weights_file: String,
    pub weights_precision: String,
    /// 変換元モデルの学習時刻
    pub source_trained_at: String,
}

impl MobileManifest {
    fn model_config(&self) -> ModelConfig {
        let [_, height, width, channels] = self.input.shape;
        ModelConfig::new(self.class_labels.len())
            .with_architecture(self.architecture)
            .with_image_height(height)
            .with_image_width(width)
            .with_channels(channels)
    }
}

/// コマンドライン引数（プログラム名を含む）からパスを取り出す
///
/// 引数がちょうど2つでなければ `None`。
pub fn parse_convert_args(args: &[String]) -> Option<(PathBuf, PathBuf)> {
    match args {
        [_, model_path, output_path] => Some((PathBuf::from(model_path), PathBuf::from(output_path))),
        _ => None,
    }
}

/// 固定入力形状でダミー推論を行い、重みが入力に合うことを確認する
fn dry_run<B: Backend>(model: &SmileNet<B>, num_classes: usize, device: &B::Device) -> Result<()> {
    let [n, h, w, c] = INPUT_SHAPE;
    let input = Tensor::<B, 4>::zeros([n, c, h, w], device);
    let output = model.forward_probabilities(input);

    let dims = output.dims();
    if dims != [n, num_classes] {
        anyhow::bail!(
            "unexpected output shape {:?} (expected [{}, {}])",
            dims,
            n,
            num_classes
        );
    }
    if to_f32_vec(output)?.iter().any(|p| !p.is_finite()) {
        anyhow::bail!("dry run produced non-finite probabilities");
    }
    Ok(())
}

/// モデルを変換してバンドルを書き出す
///
/// 失敗した場合は何も書き出さない。
pub fn convert_model(model_path: &Path, output_path: &Path) -> Result<()> {
    let (metadata, model_binary) = load_model_with_metadata(model_path)
        .with_context(|| format!("Failed to load model: {}", model_path.display()))?;

    let [_, height, width, channels] = INPUT_SHAPE;
    if (metadata.image_height, metadata.image_width, metadata.channels) != (height, width, channels)
    {
        anyhow::bail!(
            "モデルの入力サイズ {}x{}x{} は変換形式 {:?} と一致しません",
            metadata.image_height,
            metadata.image_width,
            metadata.channels,
            INPUT_SHAPE
        );
    }

    let device = NdArrayDevice::Cpu;
    let model = restore_model::<ConvertBackend>(&metadata, model_binary, &device)?;
    dry_run(&model, metadata.class_labels.len(), &device)?;

    let weights = BinBytesRecorder::<HalfPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to encode weights: {:?}", e))?;

    let manifest = MobileManifest {
        format: BUNDLE_FORMAT.to_string(),
        minimum_deployment_target: MINIMUM_DEPLOYMENT_TARGET.to_string(),
        input: ImageInput {
            name: "image".to_string(),
            shape: INPUT_SHAPE,
            color_layout: "grayscale".to_string(),
            scale: 1.0 / 255.0,
            bias: 0.0,
        },
        class_labels: metadata.class_labels.clone(),
        architecture: metadata.architecture,
        weights_file: WEIGHTS_ENTRY.to_string(),
        weights_precision: "f16".to_string(),
        source_trained_at: metadata.trained_at.clone(),
    };
    let manifest_json =
        serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;

    write_archive(
        output_path,
        &[
            (MANIFEST_ENTRY, manifest_json.as_bytes()),
            (WEIGHTS_ENTRY, weights.as_slice()),
        ],
    )
    .with_context(|| format!("Failed to write bundle: {}", output_path.display()))?;

    log::info!(
        "変換完了: {} -> {} (重み {} バイト)",
        model_path.display(),
        output_path.display(),
        weights.len()
    );
    Ok(())
}

/// バンドルからマニフェストを読み込む
pub fn load_bundle_manifest(bundle_path: &Path) -> Result<MobileManifest> {
    let bytes = read_entry(bundle_path, MANIFEST_ENTRY)?;
    serde_json::from_slice(&bytes).context("Failed to deserialize manifest")
}

/// バンドルからモデルを復元する
pub fn load_bundle_model<B: Backend>(
    bundle_path: &Path,
    device: &B::Device,
) -> Result<(MobileManifest, SmileNet<B>)> {
    let manifest = load_bundle_manifest(bundle_path)?;
    let weights = read_entry(bundle_path, &manifest.weights_file)?;

    let record = BinBytesRecorder::<HalfPrecisionSettings>::default()
        .load(weights, device)
        .map_err(|e| anyhow::anyhow!("バンドル重みの読み込みエラー: {:?}", e))?;
    let model = manifest.model_config().init::<B>(device).load_record(record);

    Ok((manifest, model))
}
