use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use smile_detector_lib::convert::{convert_model, load_bundle_manifest};
use smile_detector_lib::dataset::{DataError, ImageDataset, Label};
use smile_detector_lib::ml::Architecture;
use smile_detector_lib::model::{load_metadata, DeviceType};
use smile_detector_lib::pipeline::{run_predict, run_train, PredictArgs, TrainArgs};

/// 笑顔は上半分が明るく、それ以外は下半分が明るい 28x28 画像
fn write_face(path: &Path, smiling: bool, seed: u8) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let image = GrayImage::from_fn(28, 28, |_, y| {
        let bright = (y < 14) == smiling;
        Luma([if bright { 200 + seed % 50 } else { seed % 30 }])
    });
    image.save(path).unwrap();
}

fn build_dataset(root: &Path, positives: usize, negatives: usize) -> PathBuf {
    let data = root.join("SMILEs");
    for i in 0..positives {
        write_face(
            &data.join(format!("positives/positives7/{:05}.png", i)),
            true,
            i as u8,
        );
    }
    for i in 0..negatives {
        write_face(
            &data.join(format!("negatives/negatives7/{:05}.png", i)),
            false,
            i as u8,
        );
    }
    data
}

// バックエンドの乱数状態はプロセス全体で共有されるため、学習は1つずつ実行する
static TRAINING: Mutex<()> = Mutex::new(());

fn training_lock() -> MutexGuard<'static, ()> {
    TRAINING.lock().unwrap_or_else(|e| e.into_inner())
}

fn train_args(dataset: &Path, model: &Path) -> TrainArgs {
    TrainArgs {
        dataset: dataset.to_path_buf(),
        model: model.to_path_buf(),
        config: None,
        architecture: Some(Architecture::ShallowNet),
        device: Some(DeviceType::Cpu),
        epochs: Some(1),
        batch_size: Some(8),
        seed: None,
        plot: None,
    }
}

#[test]
fn loader_counts_and_labels() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 3, 5);

    let dataset = ImageDataset::load(&data, 28).unwrap();
    assert_eq!(dataset.len(), 8);
    assert_eq!((dataset.height(), dataset.width()), (28, 28));

    for sample in dataset.samples() {
        let in_positives = sample.path.to_string_lossy().contains("/positives/");
        assert_eq!(sample.label == Label::Smiling, in_positives);
        assert_eq!(sample.pixels.len(), 28 * 28);
    }
}

#[test]
fn inconsistent_image_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 2, 2);
    let wide = data.join("negatives/negatives7/wide.png");
    GrayImage::from_pixel(56, 28, Luma([0])).save(&wide).unwrap();

    let err = ImageDataset::load(&data, 28).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DataError>(),
        Some(DataError::InconsistentSize { .. })
    ));
}

#[test]
fn empty_dataset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = ImageDataset::load(dir.path(), 28).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DataError>(),
        Some(DataError::Empty(_))
    ));
}

#[test]
fn single_class_dataset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 0, 10);
    let model = dir.path().join("output/model");

    let err = run_train(train_args(&data, &model)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DataError>(),
        Some(DataError::TooFewSamples { class, .. }) if class == "smiling"
    ));
    assert!(!dir.path().join("output").exists());
}

#[test]
fn train_convert_predict() {
    let _guard = training_lock();
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 10, 10);
    let output = dir.path().join("output");

    // 学習
    let summary = run_train(train_args(&data, &output.join("lenet"))).unwrap();
    assert_eq!(summary.model_path, output.join("lenet"));
    assert!(summary.model_path.exists());
    assert_eq!(summary.history.num_epochs(), 1);
    assert_eq!(summary.report.weighted_avg.support, 4);

    // プロット指定なしならモデル以外は書き出さない
    let written: Vec<_> = std::fs::read_dir(&output).unwrap().collect();
    assert_eq!(written.len(), 1);

    let metadata = load_metadata(&summary.model_path).unwrap();
    assert_eq!(metadata.class_labels, vec!["not_smiling", "smiling"]);
    assert_eq!(metadata.architecture, Architecture::ShallowNet);
    assert_eq!(metadata.train_samples, 16);
    assert_eq!(metadata.test_samples, 4);
    assert_eq!(metadata.class_weights, vec![1.0, 1.0]);

    // 変換
    let bundle = output.join("SmileNet.bundle");
    convert_model(&summary.model_path, &bundle).unwrap();
    let manifest = load_bundle_manifest(&bundle).unwrap();
    assert_eq!(manifest.input.shape, [1, 28, 28, 1]);
    assert_eq!(manifest.minimum_deployment_target, "iOS14");
    assert_eq!(manifest.class_labels, metadata.class_labels);

    // 推論
    let image = data.join("positives/positives7/00000.png");
    let predictions = run_predict(PredictArgs {
        model: summary.model_path.clone(),
        device: DeviceType::Cpu,
        images: vec![image.clone()],
    })
    .unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].path, image);
    assert!(metadata.class_labels.contains(&predictions[0].label));
}

#[test]
fn plot_is_written_when_requested() {
    let _guard = training_lock();
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 6, 6);
    let plot = dir.path().join("plots/history.png");

    let mut args = train_args(&data, &dir.path().join("model.tar.gz"));
    args.plot = Some(plot.clone());

    let summary = run_train(args).unwrap();
    assert_eq!(summary.model_path, dir.path().join("model.tar.gz"));
    assert!(summary.model_path.exists());

    let png = std::fs::read(&plot).unwrap();
    assert!(png.starts_with(b"\x89PNG"));
}

#[test]
fn model_path_is_used_verbatim_by_convert() {
    let _guard = training_lock();
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 6, 6);
    let model = dir.path().join("output/lenet.hdf5");

    run_train(train_args(&data, &model)).unwrap();
    assert!(model.exists());
    assert!(!dir.path().join("output/lenet.tar.gz").exists());

    // train に渡したパスをそのまま convert に渡す
    let bundle = dir.path().join("output/SmileNet.mlmodel");
    convert_model(&model, &bundle).unwrap();
    assert_eq!(load_bundle_manifest(&bundle).unwrap().input.shape, [1, 28, 28, 1]);
}

#[test]
fn same_seed_gives_same_results() {
    let _guard = training_lock();
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 8, 8);

    let run = |name: &str| {
        let mut args = train_args(&data, &dir.path().join(name));
        args.epochs = Some(3);
        args.seed = Some(42);
        run_train(args).unwrap()
    };
    let first = run("first");
    let second = run("second");

    assert_eq!(first.history, second.history);
    assert_eq!(first.report, second.report);
    assert_eq!(
        load_metadata(&first.model_path).unwrap().test_samples,
        load_metadata(&second.model_path).unwrap().test_samples
    );
}

#[test]
fn undecodable_image_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let data = build_dataset(dir.path(), 3, 3);
    let broken = data.join("positives/positives7/broken.png");
    std::fs::write(&broken, b"not an image at all").unwrap();

    let err = ImageDataset::load(&data, 28).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.png"));
}
