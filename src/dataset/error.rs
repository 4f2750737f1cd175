use std::path::PathBuf;

use thiserror::Error;

/// データセット準備段階で発生するエラー
#[derive(Debug, Error)]
pub enum DataError {
    /// 画像が1枚も見つからない
    #[error("no images found under {}", .0.display())]
    Empty(PathBuf),

    /// リサイズ後の画像サイズが揃っていない
    #[error(
        "image {} resized to {width}x{height}, expected {expected_width}x{expected_height}",
        .path.display()
    )]
    InconsistentSize {
        path: PathBuf,
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },

    /// エンコーダが知らないラベル
    #[error("unknown label: {0}")]
    UnknownLabel(String),

    /// クラスのサンプル数が不足している
    #[error("class '{class}' has {count} sample(s); at least {required} required")]
    TooFewSamples {
        class: String,
        count: usize,
        required: usize,
    },

    /// テスト割合が範囲外
    #[error("test_size must be within (0, 1), got {0}")]
    InvalidTestSize(f64),

    /// 分割後のサイズがクラス数を下回る
    #[error("{split} split would have {size} sample(s), fewer than the {classes} classes")]
    SplitTooSmall {
        split: &'static str,
        size: usize,
        classes: usize,
    },
}
