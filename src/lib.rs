//! 笑顔判定モデルの学習パイプラインとモバイル向け変換

pub mod convert;
pub mod dataset;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod report;

/// 各バイナリ共通のロガー初期化（既定レベル info、RUST_LOG で上書き）
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
