//! 学習済みモデルで画像を分類

use clap::Parser;
use smile_detector_lib::model::{load_metadata, print_metadata_info};
use smile_detector_lib::pipeline::{run_predict, PredictArgs};

fn main() -> anyhow::Result<()> {
    smile_detector_lib::init_logger();

    let args = PredictArgs::parse();
    print_metadata_info(&load_metadata(&args.model)?);

    for prediction in run_predict(args)? {
        println!(
            "{}: {} ({:.2}%)",
            prediction.path.display(),
            prediction.label,
            prediction.confidence * 100.0
        );
    }
    Ok(())
}
