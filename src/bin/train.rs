//! 笑顔判定モデルの学習

use clap::Parser;
use smile_detector_lib::pipeline::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    smile_detector_lib::init_logger();

    let args = TrainArgs::parse();
    let summary = run_train(args)?;

    println!("モデルを保存しました: {}", summary.model_path.display());
    Ok(())
}
