//! 評価レポートと学習曲線
//!
//! テストデータに対する分類レポート（precision / recall / F1）の計算と表示、
//! エポックごとの学習履歴の表・グラフ出力。

use anyhow::Result;
use plotters::prelude::*;
use std::error::Error;
use std::fmt;
use std::path::Path;

use crate::ml::TrainingHistory;

/// 1クラス分（または平均）の指標
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// 分類レポート
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub target_names: Vec<String>,
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

/// 分母が0なら0を返す
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    /// 正解と予測のクラスIDからレポートを作る
    ///
    /// `target_names` の長さがクラス数。範囲外のIDは集計から外れる。
    pub fn new(y_true: &[usize], y_pred: &[usize], target_names: &[String]) -> Self {
        let num_classes = target_names.len();
        let mut true_positive = vec![0usize; num_classes];
        let mut predicted = vec![0usize; num_classes];
        let mut support = vec![0usize; num_classes];
        let mut correct = 0;

        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t == p {
                correct += 1;
                if let Some(tp) = true_positive.get_mut(t) {
                    *tp += 1;
                }
            }
            if let Some(s) = support.get_mut(t) {
                *s += 1;
            }
            if let Some(c) = predicted.get_mut(p) {
                *c += 1;
            }
        }

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|i| {
                let precision = ratio(true_positive[i], predicted[i]);
                let recall = ratio(true_positive[i], support[i]);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    precision,
                    recall,
                    f1,
                    support: support[i],
                }
            })
            .collect();

        let total: usize = support.iter().sum();
        let mean = |f: fn(&ClassMetrics) -> f64| {
            if num_classes == 0 {
                0.0
            } else {
                per_class.iter().map(f).sum::<f64>() / num_classes as f64
            }
        };
        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                per_class
                    .iter()
                    .map(|m| f(m) * m.support as f64)
                    .sum::<f64>()
                    / total as f64
            }
        };

        let macro_avg = ClassMetrics {
            precision: mean(|m| m.precision),
            recall: mean(|m| m.recall),
            f1: mean(|m| m.f1),
            support: total,
        };
        let weighted_avg = ClassMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
            support: total,
        };

        Self {
            target_names: target_names.to_vec(),
            per_class,
            accuracy: ratio(correct, y_true.len().min(y_pred.len())),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .target_names
            .iter()
            .map(|n| n.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(0);

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;

        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )
        };

        for (name, metrics) in self.target_names.iter().zip(&self.per_class) {
            row(f, name, metrics)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

/// 学習履歴を表形式で出力
pub fn print_history(history: &TrainingHistory) {
    println!(
        "{:>5} {:>10} {:>10} {:>10} {:>12}",
        "epoch", "loss", "accuracy", "val_loss", "val_accuracy"
    );
    for epoch in 0..history.num_epochs() {
        println!(
            "{:>5} {:>10.4} {:>10.4} {:>10.4} {:>12.4}",
            epoch + 1,
            history.loss[epoch],
            history.accuracy[epoch],
            history.val_loss[epoch],
            history.val_accuracy[epoch]
        );
    }
}

/// 学習曲線（loss / accuracy）をPNGに描画
pub fn plot_history(history: &TrainingHistory, output_path: &Path) -> Result<()> {
    if history.num_epochs() == 0 {
        anyhow::bail!("学習履歴が空のためグラフを描画できません");
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    draw_history(history, output_path)
        .map_err(|e| anyhow::anyhow!("Failed to draw plot {}: {}", output_path.display(), e))?;

    log::info!("学習曲線を保存しました: {}", output_path.display());
    Ok(())
}

fn draw_history(history: &TrainingHistory, output_path: &Path) -> Result<(), Box<dyn Error>> {
    let epochs = history.num_epochs();
    let series: [(&str, &Vec<f64>, RGBColor); 4] = [
        ("train_loss", &history.loss, RED),
        ("val_loss", &history.val_loss, BLUE),
        ("accuracy", &history.accuracy, GREEN),
        ("val_accuracy", &history.val_accuracy, MAGENTA),
    ];

    let y_max = series
        .iter()
        .flat_map(|(_, values, _)| values.iter().copied())
        .filter(|v| v.is_finite())
        .fold(1.0f64, f64::max)
        * 1.05;

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Training Loss and Accuracy", ("sans-serif", 32))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..epochs.saturating_sub(1).max(1), 0.0..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Epoch #")
        .y_desc("Loss/Accuracy")
        .draw()?;

    for (name, values, color) in series {
        chart
            .draw_series(LineSeries::new(
                values.iter().enumerate().map(|(i, &v)| (i, v)),
                &color,
            ))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
