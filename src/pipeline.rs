//! 学習・推論コマンドの本体
//!
//! 読み込み -> ラベル導出 -> エンコード -> クラス重み -> 層化分割 -> 学習
//! -> 評価レポート -> 保存 の順に1回だけ実行する。

use anyhow::Result;
use burn::{
    backend::{Autodiff, NdArray, Wgpu},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use burn_ndarray::NdArrayDevice;
use burn_wgpu::WgpuDevice;
use clap::Parser;
use std::path::PathBuf;

use crate::dataset::{
    stratified_split, to_categorical, ClassWeights, DataError, ImageDataset, Label, LabelEncoder,
};
use crate::ml::{
    predict_classes, train_model, Architecture, InferenceEngine, ModelConfig, SmileDataset,
    TrainingHistory, NUM_CLASSES,
};
use crate::model::{save_model_with_metadata, AppConfig, DeviceType, ModelMetadata};
use crate::report::{plot_history, print_history, ClassificationReport};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    about = "Train the smile classifier on a directory of face crops."
)]
pub struct TrainArgs {
    /// Path to input dataset of faces.
    #[arg(short = 'd', long)]
    pub dataset: PathBuf,
    /// Path to output model.
    #[arg(short = 'm', long)]
    pub model: PathBuf,
    /// Optional JSON config file; command line flags take precedence.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Network architecture.
    #[arg(long, value_enum)]
    pub architecture: Option<Architecture>,
    /// Compute backend.
    #[arg(long, value_enum)]
    pub device: Option<DeviceType>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Write the loss/accuracy curves to this PNG.
    #[arg(long)]
    pub plot: Option<PathBuf>,
}

impl TrainArgs {
    /// 設定ファイル（あれば）にコマンドライン指定を上書きする
    pub fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load_or_default(self.config.as_deref())?;
        if let Some(architecture) = self.architecture {
            config.model.architecture = architecture;
        }
        if let Some(device) = self.device {
            config.device_type = device;
        }
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        Ok(config)
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainSummary {
    /// 保存したモデルのパス
    pub model_path: PathBuf,
    pub report: ClassificationReport,
    pub history: TrainingHistory,
}

/// 学習を実行
pub fn run_train(args: TrainArgs) -> Result<TrainSummary> {
    let config = args.resolve_config()?;
    config.display();

    // 画像読み込みとラベル導出
    let dataset = ImageDataset::load(&args.dataset, config.model.image_width)?;

    // エンコード（全ラベルで fit）
    let labels = dataset.labels();
    let encoder = LabelEncoder::fit(&labels);
    for expected in [Label::NotSmiling, Label::Smiling] {
        if !encoder.classes().iter().any(|c| c == expected.as_str()) {
            return Err(DataError::TooFewSamples {
                class: expected.to_string(),
                count: 0,
                required: 2,
            }
            .into());
        }
    }
    let class_indices = encoder.transform(&labels)?;
    let one_hot = to_categorical(&class_indices, NUM_CLASSES);

    let class_weights = ClassWeights::from_one_hot(&one_hot, encoder.classes())?;
    for (name, weight) in encoder.classes().iter().zip(class_weights.as_slice()) {
        log::info!("クラス重み {}: {:.4}", name, weight);
    }

    // 層化分割
    let split = stratified_split(
        &class_indices,
        encoder.classes(),
        config.training.test_size,
        config.training.seed,
    )?;
    log::info!(
        "学習データ: {} 枚, テストデータ: {} 枚",
        split.train.len(),
        split.test.len()
    );

    let train = SmileDataset::from_indices(&dataset, &class_indices, &split.train);
    let test = SmileDataset::from_indices(&dataset, &class_indices, &split.test);

    let model_config = ModelConfig::new(encoder.num_classes())
        .with_architecture(config.model.architecture)
        .with_image_height(dataset.height())
        .with_image_width(dataset.width());
    model_config.validate()?;

    let outcome = match config.device_type {
        DeviceType::Cpu => train_and_evaluate::<Autodiff<NdArray>>(
            &model_config,
            train,
            test.clone(),
            &class_weights,
            &config,
            &NdArrayDevice::Cpu,
        )?,
        DeviceType::Wgpu => train_and_evaluate::<Autodiff<Wgpu>>(
            &model_config,
            train,
            test.clone(),
            &class_weights,
            &config,
            &WgpuDevice::DefaultDevice,
        )?,
    };

    // 評価
    let report = ClassificationReport::new(&test.labels(), &outcome.predictions, encoder.classes());
    println!("[INFO] evaluating network...");
    println!("{}", report);
    print_history(&outcome.history);

    // 保存
    let metadata = ModelMetadata::new(
        encoder.classes().to_vec(),
        &model_config,
        &config.training,
        class_weights.as_slice().to_vec(),
        split.train.len(),
        split.test.len(),
        outcome.history.clone(),
    );
    let model_path = save_model_with_metadata(&args.model, &metadata, &outcome.model_binary)?;
    log::info!("モデルを保存しました: {}", model_path.display());

    if let Some(plot_path) = &args.plot {
        plot_history(&outcome.history, plot_path)?;
    }

    Ok(TrainSummary {
        model_path,
        report,
        history: outcome.history,
    })
}

struct TrainOutcome {
    model_binary: Vec<u8>,
    history: TrainingHistory,
    predictions: Vec<usize>,
}

fn train_and_evaluate<B: AutodiffBackend>(
    model_config: &ModelConfig,
    train: SmileDataset,
    test: SmileDataset,
    class_weights: &ClassWeights,
    config: &AppConfig,
    device: &B::Device,
) -> Result<TrainOutcome> {
    log::info!("使用デバイス: {:?}", device);

    let (model, history) = train_model::<B>(
        model_config,
        train,
        test.clone(),
        class_weights,
        &config.training,
        device,
    )?;

    let predictions = predict_classes::<B::InnerBackend>(
        &model,
        test,
        model_config.image_height,
        model_config.image_width,
        model_config.num_classes,
        device,
    )?;

    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to encode model weights: {:?}", e))?;

    Ok(TrainOutcome {
        model_binary,
        history,
        predictions,
    })
}

#[derive(Parser, Debug, Clone)]
#[command(name = "predict", about = "Classify face images with a trained model.")]
pub struct PredictArgs {
    /// Path to a trained model archive.
    #[arg(short = 'm', long)]
    pub model: PathBuf,
    /// Compute backend.
    #[arg(long, value_enum, default_value_t = DeviceType::Cpu)]
    pub device: DeviceType,
    /// Images to classify.
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}

/// 1枚分の推論結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub path: PathBuf,
    pub label: String,
    pub confidence: f32,
}

/// 画像を分類
pub fn run_predict(args: PredictArgs) -> Result<Vec<Prediction>> {
    match args.device {
        DeviceType::Cpu => predict_with::<NdArray>(&args, NdArrayDevice::Cpu),
        DeviceType::Wgpu => predict_with::<Wgpu>(&args, WgpuDevice::DefaultDevice),
    }
}

fn predict_with<B: Backend>(args: &PredictArgs, device: B::Device) -> Result<Vec<Prediction>> {
    let engine = InferenceEngine::<B>::load(&args.model, device)?;
    args.images
        .iter()
        .map(|path| {
            let (label, confidence) = engine.classify_image(path)?;
            Ok(Prediction {
                path: path.clone(),
                label,
                confidence,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_args_parse() {
        let args = TrainArgs::try_parse_from([
            "train",
            "-d",
            "SMILEs",
            "-m",
            "output/lenet",
            "--architecture",
            "shallownet",
            "--device",
            "cpu",
            "--epochs",
            "2",
        ])
        .unwrap();

        assert_eq!(args.dataset, PathBuf::from("SMILEs"));
        assert_eq!(args.model, PathBuf::from("output/lenet"));
        assert_eq!(args.architecture, Some(Architecture::ShallowNet));
        assert_eq!(args.device, Some(DeviceType::Cpu));
        assert!(args.plot.is_none());
    }

    #[test]
    fn dataset_and_model_are_required() {
        assert!(TrainArgs::try_parse_from(["train", "-d", "SMILEs"]).is_err());
        assert!(TrainArgs::try_parse_from(["train", "-m", "model"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let mut file_config = AppConfig::default();
        file_config.training.num_epochs = 30;
        file_config.training.batch_size = 8;
        file_config.save(&config_path).unwrap();

        let args = TrainArgs::try_parse_from([
            "train",
            "-d",
            "data",
            "-m",
            "model",
            "--config",
            config_path.to_str().unwrap(),
            "--epochs",
            "3",
        ])
        .unwrap();
        let config = args.resolve_config().unwrap();

        assert_eq!(config.training.num_epochs, 3);
        assert_eq!(config.training.batch_size, 8);
        assert_eq!(config.model.architecture, Architecture::LeNet);
    }

    #[test]
    fn predict_args_need_images() {
        assert!(PredictArgs::try_parse_from(["predict", "-m", "model.tar.gz"]).is_err());
        let args =
            PredictArgs::try_parse_from(["predict", "-m", "model.tar.gz", "a.png", "b.png"]).unwrap();
        assert_eq!(args.images.len(), 2);
        assert_eq!(args.device, DeviceType::Cpu);
    }
}
