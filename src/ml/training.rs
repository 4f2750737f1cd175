//! モデル学習と評価用の推論

use anyhow::Result;
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor, TensorData,
    },
};
use serde::{Deserialize, Serialize};

use crate::dataset::{to_categorical, ClassWeights, ImageDataset};
use crate::ml::{ModelConfig, SmileNet};
use crate::model::config::TrainingSettings;

/// 評価時のバッチサイズ
pub const PREDICT_BATCH_SIZE: usize = 64;

/// Adam の epsilon
const ADAM_EPSILON: f32 = 1e-7;

/// 学習用アイテム（正規化済み画素とクラスID）
#[derive(Clone, Debug)]
pub struct SmileItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

/// メモリ上のデータセット
#[derive(Clone, Debug, Default)]
pub struct SmileDataset {
    items: Vec<SmileItem>,
}

impl SmileDataset {
    pub fn new(items: Vec<SmileItem>) -> Self {
        Self { items }
    }

    /// 分割インデックスに従って画像データセットから切り出す
    ///
    /// `labels` は `dataset` と同じ順序のクラスID。
    pub fn from_indices(dataset: &ImageDataset, labels: &[usize], indices: &[usize]) -> Self {
        let items = indices
            .iter()
            .filter_map(|&i| {
                let sample = dataset.samples().get(i)?;
                Some(SmileItem {
                    pixels: sample.pixels.clone(),
                    label: *labels.get(i)?,
                })
            })
            .collect();
        Self { items }
    }

    /// クラスID一覧（アイテム順）
    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }
}

impl Dataset<SmileItem> for SmileDataset {
    fn get(&self, index: usize) -> Option<SmileItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct SmileBatcher {
    height: usize,
    width: usize,
    class_weights: ClassWeights,
}

impl SmileBatcher {
    pub fn new(height: usize, width: usize, class_weights: ClassWeights) -> Self {
        Self {
            height,
            width,
            class_weights,
        }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SmileBatch<B: Backend> {
    /// [batch_size, 1, height, width]
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
    /// [batch_size, num_classes]
    pub one_hot: Tensor<B, 2>,
    /// サンプルごとのクラス重み
    pub weights: Tensor<B, 1>,
}

impl<B: Backend> Batcher<B, SmileItem, SmileBatch<B>> for SmileBatcher {
    fn batch(&self, items: Vec<SmileItem>, device: &B::Device) -> SmileBatch<B> {
        let batch_size = items.len();
        let num_classes = self.class_weights.as_slice().len();

        let mut pixels = Vec::with_capacity(batch_size * self.height * self.width);
        let mut targets = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);

        for item in &items {
            pixels.extend_from_slice(&item.pixels);
            targets.push(item.label as i64);
            weights.push(self.class_weights.get(item.label));
        }

        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let one_hot: Vec<f32> = to_categorical(&labels, num_classes)
            .into_iter()
            .flatten()
            .collect();

        // バッチ全体を1回で転送
        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
            .reshape([batch_size, 1, self.height, self.width]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);
        let one_hot =
            Tensor::<B, 2>::from_data(TensorData::new(one_hot, [batch_size, num_classes]), device);
        let weights = Tensor::<B, 1>::from_floats(weights.as_slice(), device);

        SmileBatch {
            images,
            targets,
            one_hot,
            weights,
        }
    }
}

/// エポックごとの学習履歴
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_accuracy: Vec<f64>,
}

impl TrainingHistory {
    pub fn push(&mut self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) {
        self.loss.push(loss);
        self.accuracy.push(accuracy);
        self.val_loss.push(val_loss);
        self.val_accuracy.push(val_accuracy);
    }

    pub fn num_epochs(&self) -> usize {
        self.loss.len()
    }
}

/// 損失と正解数の累積
#[derive(Default)]
struct EpochStats {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl EpochStats {
    fn record<B: Backend>(
        &mut self,
        loss: Tensor<B, 1>,
        output: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Result<()> {
        let batch_size = targets.dims()[0];
        let loss = to_f32_vec(loss)?.first().copied().unwrap_or(0.0);
        let predicted = to_i64_vec(output.argmax(1).reshape([batch_size]))?;
        let targets = to_i64_vec(targets)?;

        self.loss_sum += loss as f64 * batch_size as f64;
        self.correct += predicted
            .iter()
            .zip(&targets)
            .filter(|(p, t)| p == t)
            .count();
        self.seen += batch_size;
        Ok(())
    }

    fn loss(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }
}

/// モデル学習を実行
///
/// 早期終了やチェックポイントは行わず、常に `num_epochs` 回学習する。
/// 検証損失はクラス重みなしで計算する。
pub fn train_model<B: AutodiffBackend>(
    model_config: &ModelConfig,
    train: SmileDataset,
    valid: SmileDataset,
    class_weights: &ClassWeights,
    settings: &TrainingSettings,
    device: &B::Device,
) -> Result<(SmileNet<B::InnerBackend>, TrainingHistory)> {
    model_config.validate()?;
    if train.is_empty() {
        anyhow::bail!("学習データが空です");
    }

    B::seed(device, settings.seed);

    let height = model_config.image_height;
    let width = model_config.image_width;
    let num_classes = model_config.num_classes;

    let batcher_train = SmileBatcher::new(height, width, class_weights.clone());
    let batcher_valid = SmileBatcher::new(height, width, ClassWeights::uniform(num_classes));

    let dataloader_train = DataLoaderBuilder::<B, SmileItem, SmileBatch<B>>::new(batcher_train)
        .batch_size(settings.batch_size.max(1))
        .shuffle(settings.seed)
        .num_workers(0)
        .set_device(device.clone())
        .build(train);

    let dataloader_valid =
        DataLoaderBuilder::<B::InnerBackend, SmileItem, SmileBatch<B::InnerBackend>>::new(batcher_valid)
            .batch_size(settings.batch_size.max(1))
            .num_workers(0)
            .set_device(device.clone())
            .build(valid);

    let mut model = model_config.init::<B>(device);
    let mut optim = AdamConfig::new().with_epsilon(ADAM_EPSILON).init();

    log::info!(
        "学習を開始します: {} パラメータ, エポック数 {}, バッチサイズ {}, 学習率 {}",
        model.num_params(),
        settings.num_epochs,
        settings.batch_size,
        settings.learning_rate
    );

    let mut history = TrainingHistory::default();

    for epoch in 1..=settings.num_epochs {
        let mut train_stats = EpochStats::default();
        for batch in dataloader_train.iter() {
            let output = model.forward_classification(
                batch.images,
                batch.targets,
                batch.one_hot,
                batch.weights,
            );
            let loss_detached = output.loss.clone().detach();
            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(settings.learning_rate, model, grads);

            train_stats.record(loss_detached, output.output.detach(), output.targets)?;
        }

        let model_valid = model.valid();
        let mut valid_stats = EpochStats::default();
        for batch in dataloader_valid.iter() {
            let output = model_valid.forward_classification(
                batch.images,
                batch.targets,
                batch.one_hot,
                batch.weights,
            );
            valid_stats.record(output.loss, output.output, output.targets)?;
        }

        log::info!(
            "エポック {}/{}: loss={:.4} accuracy={:.4} val_loss={:.4} val_accuracy={:.4}",
            epoch,
            settings.num_epochs,
            train_stats.loss(),
            train_stats.accuracy(),
            valid_stats.loss(),
            valid_stats.accuracy()
        );

        history.push(
            train_stats.loss(),
            train_stats.accuracy(),
            valid_stats.loss(),
            valid_stats.accuracy(),
        );
    }

    Ok((model.valid(), history))
}

/// データセット全体のクラスIDを予測（アイテム順）
pub fn predict_classes<B: Backend>(
    model: &SmileNet<B>,
    dataset: SmileDataset,
    height: usize,
    width: usize,
    num_classes: usize,
    device: &B::Device,
) -> Result<Vec<usize>> {
    let batcher = SmileBatcher::new(height, width, ClassWeights::uniform(num_classes));
    let dataloader = DataLoaderBuilder::<B, SmileItem, SmileBatch<B>>::new(batcher)
        .batch_size(PREDICT_BATCH_SIZE)
        .num_workers(0)
        .set_device(device.clone())
        .build(dataset);

    let mut predictions = Vec::new();
    for batch in dataloader.iter() {
        let [batch_size, _, _, _] = batch.images.dims();
        let predicted = to_i64_vec(model.predict(batch.images).reshape([batch_size]))?;
        predictions.extend(predicted.into_iter().map(|p| p as usize));
    }
    Ok(predictions)
}

pub(crate) fn to_f32_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read tensor data: {:?}", e))
}

fn to_i64_vec<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow::anyhow!("Failed to read predictions: {:?}", e))
}
