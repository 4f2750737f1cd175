//! 学習済みモデルをモバイル向けバンドルに変換

use smile_detector_lib::convert::{convert_model, parse_convert_args, USAGE};

fn main() -> anyhow::Result<()> {
    smile_detector_lib::init_logger();

    let args: Vec<String> = std::env::args().collect();
    let Some((model_path, output_path)) = parse_convert_args(&args) else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    convert_model(&model_path, &output_path)
}
