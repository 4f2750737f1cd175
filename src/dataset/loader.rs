//! 顔画像ディレクトリの読み込みとラベル導出
//!
//! ディレクトリ構成の例:
//! ```text
//! SMILEs/positives/positives7/10007.jpg  -> smiling
//! SMILEs/negatives/negatives7/10001.jpg  -> not_smiling
//! ```
//! ラベルはファイルの2つ上のディレクトリ名から決まり、画素値は参照しない。

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::DataError;

/// 読み込み対象の拡張子
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// 笑顔クラスを示すディレクトリ名
pub const POSITIVE_DIR: &str = "positives";

/// 二値ラベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    NotSmiling,
    Smiling,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::NotSmiling => "not_smiling",
            Label::Smiling => "smiling",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 1枚分のサンプル
#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    /// 行優先のグレースケール画素 [0, 1]
    pub pixels: Vec<f32>,
    pub label: Label,
}

/// メモリ上に展開したデータセット（パス順）
#[derive(Debug, Clone)]
pub struct ImageDataset {
    samples: Vec<Sample>,
    height: usize,
    width: usize,
}

impl ImageDataset {
    /// ディレクトリ以下の画像をすべて読み込む
    ///
    /// 画像のデコードに失敗した場合はその場でエラーを返す（スキップしない）。
    pub fn load(data_dir: &Path, width: usize) -> Result<Self> {
        let paths = list_images(data_dir)?;
        if paths.is_empty() {
            return Err(DataError::Empty(data_dir.to_path_buf()).into());
        }

        let mut samples = Vec::with_capacity(paths.len());
        let mut expected: Option<(usize, usize)> = None;

        for path in paths {
            let image = load_grayscale(&path, width)?;
            let size = (image.height() as usize, image.width() as usize);

            match expected {
                None => expected = Some(size),
                Some((h, w)) if (h, w) != size => {
                    return Err(DataError::InconsistentSize {
                        path,
                        width: size.1,
                        height: size.0,
                        expected_width: w,
                        expected_height: h,
                    }
                    .into());
                }
                Some(_) => {}
            }

            let label = derive_label(&path);
            samples.push(Sample {
                pixels: image_to_pixels(&image),
                label,
                path,
            });
        }

        let (height, width) = expected.unwrap_or((0, width));
        log::info!(
            "{} 枚の画像を読み込みました ({}x{}): {}",
            samples.len(),
            width,
            height,
            data_dir.display()
        );

        Ok(Self {
            samples,
            height,
            width,
        })
    }

    pub fn from_samples(samples: Vec<Sample>, height: usize, width: usize) -> Self {
        Self {
            samples,
            height,
            width,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// 文字列ラベルの一覧（サンプル順）
    pub fn labels(&self) -> Vec<&'static str> {
        self.samples.iter().map(|s| s.label.as_str()).collect()
    }
}

/// ディレクトリを再帰的に走査し、画像ファイルのパスをソートして返す
///
/// ソート順は層化分割の再現性に必要。
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("dataset directory not found: {}", dir.display());
    }

    let mut images = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory: {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_image_file(&path) {
                images.push(path);
            }
        }
    }

    images.sort();
    Ok(images)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// パスからラベルを導出する
///
/// 後ろから3番目の要素（ファイルの祖父ディレクトリ）が `positives` なら笑顔。
pub fn derive_label(path: &Path) -> Label {
    let components: Vec<_> = path.components().collect();
    if components.len() < 3 {
        return Label::NotSmiling;
    }

    match components[components.len() - 3].as_os_str().to_str() {
        Some(POSITIVE_DIR) => Label::Smiling,
        _ => Label::NotSmiling,
    }
}

/// 画像をグレースケールで読み込み、幅を指定値にリサイズ（アスペクト比維持）
pub fn load_grayscale(path: &Path, width: usize) -> Result<GrayImage> {
    let image = image::open(path)
        .with_context(|| format!("Failed to decode image: {}", path.display()))?
        .to_luma8();
    Ok(resize_to_width(&image, width))
}

/// 幅を `width` に揃え、高さは元の比率から切り捨てで求める
pub fn resize_to_width(image: &GrayImage, width: usize) -> GrayImage {
    let (w, h) = image.dimensions();
    let width = width.max(1) as u32;
    if w == width {
        return image.clone();
    }

    let ratio = width as f64 / w as f64;
    let height = ((h as f64 * ratio) as u32).max(1);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// 画素を [0, 1] に正規化して平坦化
pub fn image_to_pixels(image: &GrayImage) -> Vec<f32> {
    image.as_raw().iter().map(|&p| p as f32 / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn label_comes_from_grandparent_directory() {
        let smiling = Path::new("SMILEs/positives/positives7/10007.jpg");
        let not_smiling = Path::new("SMILEs/negatives/negatives7/10001.jpg");
        assert_eq!(derive_label(smiling), Label::Smiling);
        assert_eq!(derive_label(not_smiling), Label::NotSmiling);
    }

    #[test]
    fn parent_named_positives_is_not_enough() {
        // 親ディレクトリではなく祖父ディレクトリを見る
        let path = Path::new("data/other/positives/1.png");
        assert_eq!(derive_label(path), Label::NotSmiling);
    }

    #[test]
    fn short_paths_are_not_smiling() {
        assert_eq!(derive_label(Path::new("1.png")), Label::NotSmiling);
        assert_eq!(derive_label(Path::new("positives/1.png")), Label::NotSmiling);
    }

    #[test]
    fn resize_keeps_aspect_ratio() {
        let image = GrayImage::from_pixel(64, 32, Luma([10]));
        let resized = resize_to_width(&image, 28);
        assert_eq!(resized.dimensions(), (28, 14));

        let square = GrayImage::from_pixel(64, 64, Luma([10]));
        assert_eq!(resize_to_width(&square, 28).dimensions(), (28, 28));
    }

    #[test]
    fn pixels_are_normalized() {
        let mut image = GrayImage::new(2, 1);
        image.put_pixel(0, 0, Luma([0]));
        image.put_pixel(1, 0, Luma([255]));
        assert_eq!(image_to_pixels(&image), vec![0.0, 1.0]);
    }

    #[test]
    fn label_strings() {
        assert_eq!(Label::Smiling.to_string(), "smiling");
        assert_eq!(Label::NotSmiling.as_str(), "not_smiling");
    }
}
