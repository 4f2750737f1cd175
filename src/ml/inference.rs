//! モデル推論機能

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use std::path::Path;

use crate::dataset::loader::{image_to_pixels, load_grayscale};
use crate::ml::training::to_f32_vec;
use crate::ml::SmileNet;
use crate::model::{load_model_with_metadata, ModelMetadata};

/// メタデータとモデルバイナリからモデルを復元
pub fn restore_model<B: Backend>(
    metadata: &ModelMetadata,
    model_binary: Vec<u8>,
    device: &B::Device,
) -> Result<SmileNet<B>> {
    let model_config = metadata.model_config();
    model_config.validate()?;

    let model = model_config.init::<B>(device);

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(model_binary, device)
        .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

    Ok(model.load_record(record))
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: SmileNet<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let model = restore_model::<B>(&metadata, model_binary, &device)?;

        log::debug!(
            "モデルを読み込みました: {} ({} クラス)",
            model_path.as_ref().display(),
            metadata.class_labels.len()
        );

        Ok(Self {
            model,
            metadata,
            device,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn model(&self) -> &SmileNet<B> {
        &self.model
    }

    /// 正規化済み画素 1 枚分のクラス確率
    pub fn probabilities(&self, pixels: &[f32]) -> Result<Vec<f32>> {
        let (h, w, c) = (
            self.metadata.image_height,
            self.metadata.image_width,
            self.metadata.channels,
        );
        if pixels.len() != h * w * c {
            anyhow::bail!(
                "入力サイズが一致しません: {} 画素 (期待: {}x{}x{})",
                pixels.len(),
                w,
                h,
                c
            );
        }

        let tensor = Tensor::<B, 1>::from_floats(pixels, &self.device).reshape([1, c, h, w]);
        to_f32_vec(self.model.forward_probabilities(tensor))
    }

    /// 単一画像を分類し、(ラベル, 確信度) を返す
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<(String, f32)> {
        let image = load_grayscale(image_path.as_ref(), self.metadata.image_width)?;
        let probabilities = self.probabilities(&image_to_pixels(&image))?;

        let (class_idx, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        let label = self
            .metadata
            .class_labels
            .get(class_idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_idx))?;

        Ok((label, confidence))
    }

    /// 複数画像をまとめて分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<(String, f32)>> {
        image_paths
            .iter()
            .map(|path| self.classify_image(path))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Architecture, ModelConfig, TrainingHistory};
    use crate::model::{save_model_with_metadata, TrainingSettings};
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma};

    type TestBackend = NdArray<f32>;

    fn save(
        dir: &Path,
        model: SmileNet<TestBackend>,
        config: &ModelConfig,
    ) -> std::path::PathBuf {
        let binary = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();
        let metadata = ModelMetadata::new(
            vec!["not_smiling".to_string(), "smiling".to_string()],
            config,
            &TrainingSettings::default(),
            vec![1.0, 1.0],
            1,
            1,
            TrainingHistory::default(),
        );
        save_model_with_metadata(&dir.join("model.tar.gz"), &metadata, &binary).unwrap()
    }

    fn saved_model(dir: &Path) -> std::path::PathBuf {
        let config = ModelConfig::new(2).with_architecture(Architecture::ShallowNet);
        save(dir, config.init::<TestBackend>(&Default::default()), &config)
    }

    #[test]
    fn classifies_an_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = saved_model(dir.path());

        let image_path = dir.path().join("face.png");
        GrayImage::from_pixel(56, 56, Luma([128])).save(&image_path).unwrap();

        let engine = InferenceEngine::<TestBackend>::load(&model_path, Default::default()).unwrap();
        let (label, confidence) = engine.classify_image(&image_path).unwrap();

        assert!(label == "smiling" || label == "not_smiling");
        assert!((0.5..=1.0).contains(&confidence));
        assert_eq!(engine.classify_batch(&[&image_path]).unwrap().len(), 1);
    }

    #[test]
    fn rejects_wrong_input_size() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = saved_model(dir.path());
        let engine = InferenceEngine::<TestBackend>::load(&model_path, Default::default()).unwrap();
        assert!(engine.probabilities(&[0.0; 10]).is_err());

        // 横長画像はリサイズ後の高さが合わない
        let image_path = dir.path().join("wide.png");
        GrayImage::from_pixel(56, 28, Luma([0])).save(&image_path).unwrap();
        assert!(engine.classify_image(&image_path).is_err());
    }

    #[test]
    fn restored_model_matches_saved_weights() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = ModelConfig::new(2); // LeNet
        let original = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [2, 1, 28, 28],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let expected = to_f32_vec(original.forward(input.clone())).unwrap();
        let model_path = save(dir.path(), original, &config);

        let (metadata, binary) = load_model_with_metadata(&model_path).unwrap();
        let restored = restore_model::<TestBackend>(&metadata, binary, &device).unwrap();
        assert_eq!(to_f32_vec(restored.forward(input)).unwrap(), expected);
    }
}
