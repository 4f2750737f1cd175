//! 機械学習モデルの共通定義
//!
//! 笑顔判定用のCNN（ShallowNet / LeNet）と損失関数を提供します。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// クラス数（smiling / not_smiling）
pub const NUM_CLASSES: usize = 2;

/// 入力画像の幅
pub const IMAGE_WIDTH: usize = 28;

/// softmax出力のクランプ幅
const PROB_EPSILON: f32 = 1e-7;

/// ネットワーク構成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Conv 32 3x3 -> ReLU -> Flatten -> Dense
    #[value(name = "shallownet")]
    ShallowNet,
    /// (Conv -> ReLU -> Pool) x2 -> Dense 500 -> ReLU -> Dense
    #[value(name = "lenet")]
    LeNet,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::ShallowNet => write!(f, "ShallowNet"),
            Architecture::LeNet => write!(f, "LeNet"),
        }
    }
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ネットワーク構成
    #[config(default = "Architecture::LeNet")]
    pub architecture: Architecture,
    /// 入力画像の高さ
    #[config(default = 28)]
    pub image_height: usize,
    /// 入力画像の幅
    #[config(default = 28)]
    pub image_width: usize,
    /// 入力チャネル数（グレースケール）
    #[config(default = 1)]
    pub channels: usize,
}

impl ModelConfig {
    /// 全結合層に入る直前の特徴マップサイズ (channels, height, width)
    ///
    /// Same パディングの畳み込みはサイズを変えず、2x2 プーリングで半分（切り捨て）。
    pub fn feature_map(&self) -> (usize, usize, usize) {
        match self.architecture {
            Architecture::ShallowNet => (32, self.image_height, self.image_width),
            Architecture::LeNet => (50, self.image_height / 4, self.image_width / 4),
        }
    }

    /// 入力サイズがこの構成で扱えるか確認する
    pub fn validate(&self) -> Result<()> {
        let (c, h, w) = self.feature_map();
        if c * h * w == 0 {
            anyhow::bail!(
                "入力サイズが小さすぎます: {}x{} ({})",
                self.image_width,
                self.image_height,
                self.architecture
            );
        }
        if self.num_classes == 0 {
            anyhow::bail!("num_classes must be positive");
        }
        Ok(())
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SmileNet<B> {
        let (c, h, w) = self.feature_map();
        let features = (c * h * w).max(1);

        log::debug!(
            "[Model] {} 入力: {}x{}x{}, Flatten後の特徴次元: {}",
            self.architecture,
            self.channels,
            self.image_height,
            self.image_width,
            features
        );

        match self.architecture {
            Architecture::ShallowNet => SmileNet {
                blocks: vec![ConvBlock::new(self.channels, 32, 3, false, device)],
                hidden: None,
                output: LinearConfig::new(features, self.num_classes).init(device),
                activation: Relu::new(),
            },
            Architecture::LeNet => SmileNet {
                blocks: vec![
                    ConvBlock::new(self.channels, 20, 5, true, device),
                    ConvBlock::new(20, 50, 5, true, device),
                ],
                hidden: Some(LinearConfig::new(features, 500).init(device)),
                output: LinearConfig::new(500, self.num_classes).init(device),
                activation: Relu::new(),
            },
        }
    }
}

/// Conv (same) -> ReLU -> 任意で 2x2 MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        pooled: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool: pooled.then(|| MaxPool2dConfig::new([2, 2]).init()),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// 笑顔判定用CNNモデル
///
/// # 入出力
/// - 入力: [batch_size, 1, height, width]
/// - 出力: クラスごとのロジット [batch_size, num_classes]
#[derive(Module, Debug)]
pub struct SmileNet<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    hidden: Option<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> SmileNet<B> {
    /// 順伝播（ロジット）
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }

        // Flatten
        let [_, c, h, w] = x.dims();
        let mut x = x.reshape([batch_size, c * h * w]);

        if let Some(hidden) = &self.hidden {
            x = self.activation.forward(hidden.forward(x));
        }

        self.output.forward(x)
    }

    /// 順伝播（softmax確率）
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 予測クラスIDを返す [batch_size, 1]
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2, Int> {
        self.forward(images).argmax(1)
    }

    /// 順伝播と損失計算
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, h, w]
    /// - `targets`: クラスID [batch_size]
    /// - `one_hot`: one-hot ターゲット [batch_size, num_classes]
    /// - `weights`: サンプルごとのクラス重み [batch_size]
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
        one_hot: Tensor<B, 2>,
        weights: Tensor<B, 1>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = weighted_binary_cross_entropy(output.clone(), one_hot, weights);
        ClassificationOutput::new(loss, output, targets)
    }
}

/// クラス重み付きバイナリ交差エントロピー
///
/// softmax 出力の各要素について BCE を取り、クラス軸で平均してから
/// サンプルの重みを掛け、バッチ平均する。
pub fn weighted_binary_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    one_hot: Tensor<B, 2>,
    weights: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let [batch_size, _] = logits.dims();

    let probs = softmax(logits, 1).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
    let inverse_probs = probs.clone().neg().add_scalar(1.0);
    let inverse_targets = one_hot.clone().neg().add_scalar(1.0);

    let elementwise = one_hot * probs.log() + inverse_targets * inverse_probs.log();
    let per_sample = elementwise.mean_dim(1).reshape([batch_size]).neg();

    (per_sample * weights).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap()[0]
    }

    #[test]
    fn shallownet_output_shape() {
        let device = Default::default();
        let config = ModelConfig::new(NUM_CLASSES).with_architecture(Architecture::ShallowNet);
        let model = config.init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([3, 1, 28, 28], &device);
        assert_eq!(model.forward(images).dims(), [3, 2]);
    }

    #[test]
    fn lenet_output_shape() {
        let device = Default::default();
        let config = ModelConfig::new(NUM_CLASSES);
        assert_eq!(config.architecture, Architecture::LeNet);
        assert_eq!(config.feature_map(), (50, 7, 7));

        let model = config.init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 1, 28, 28], &device);
        assert_eq!(model.forward(images.clone()).dims(), [2, 2]);
        assert_eq!(model.predict(images).dims(), [2, 1]);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let device = Default::default();
        let model = ModelConfig::new(NUM_CLASSES)
            .with_architecture(Architecture::ShallowNet)
            .init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([2, 1, 28, 28], &device);
        let sums = model
            .forward_probabilities(images)
            .sum_dim(1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn too_small_input_is_rejected() {
        let config = ModelConfig::new(NUM_CLASSES)
            .with_image_height(3)
            .with_image_width(3);
        assert!(config.validate().is_err());
        assert!(config
            .with_architecture(Architecture::ShallowNet)
            .validate()
            .is_ok());
    }

    #[test]
    fn bce_matches_hand_computation() {
        let device = Default::default();
        // ロジット [0, 0] -> 確率 [0.5, 0.5] -> BCE = ln 2
        let logits = Tensor::<TestBackend, 2>::zeros([1, 2], &device);
        let one_hot =
            Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![0.0f32, 1.0], [1, 2]), &device);
        let weights = Tensor::<TestBackend, 1>::from_floats([1.0f32], &device);
        let loss = scalar(weighted_binary_cross_entropy(logits, one_hot, weights));
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn bce_scales_with_class_weight() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![2.0f32, -1.0, 0.5, 0.5], [2, 2]),
            &device,
        );
        let one_hot = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 1.0, 0.0], [2, 2]),
            &device,
        );

        let unweighted = scalar(weighted_binary_cross_entropy(
            logits.clone(),
            one_hot.clone(),
            Tensor::from_floats([1.0f32, 1.0], &device),
        ));
        let doubled = scalar(weighted_binary_cross_entropy(
            logits,
            one_hot,
            Tensor::from_floats([2.0f32, 2.0], &device),
        ));
        assert!((doubled - 2.0 * unweighted).abs() < 1e-4);
    }

    #[test]
    fn architecture_names() {
        assert_eq!(
            Architecture::from_str("lenet", true).unwrap(),
            Architecture::LeNet
        );
        assert_eq!(
            Architecture::from_str("ShallowNet", true).unwrap(),
            Architecture::ShallowNet
        );
        assert!(Architecture::from_str("resnet", true).is_err());
        assert_eq!(
            serde_json::to_string(&Architecture::ShallowNet).unwrap(),
            "\"shallownet\""
        );
    }
}
