use std::fmt::Write;

use crate::features::osu::SnapshotData;

/// 变化方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 变好（绿色上箭头）
    Up,
    /// 变差（红色下箭头）
    Down,
    /// 不变（灰色菱形）
    Neutral,
}

impl Direction {
    pub fn color(self) -> &'static str {
        match self {
            Direction::Up => "#00FF00",
            Direction::Down => "#FF0000",
            Direction::Neutral => "#808080",
        }
    }
}

/// 指标的比较方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// 排名类：越小越好
    Rank,
    /// 数值类：越大越好
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub direction: Direction,
    /// 始终为非负的差值绝对值
    pub magnitude: f64,
}

/// 对单个指标的前后两次取值分类
pub fn classify(kind: MetricKind, prev: f64, curr: f64) -> Delta {
    if curr == prev {
        return Delta {
            direction: Direction::Neutral,
            magnitude: 0.0,
        };
    }
    let improved = match kind {
        MetricKind::Rank => curr < prev,
        MetricKind::Value => curr > prev,
    };
    Delta {
        direction: if improved {
            Direction::Up
        } else {
            Direction::Down
        },
        magnitude: (curr - prev).abs(),
    }
}

/// 图中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub label: &'static str,
    pub kind: MetricKind,
    pub prev: f64,
    pub curr: f64,
}

impl Metric {
    fn new(label: &'static str, kind: MetricKind, prev: f64, curr: f64) -> Self {
        Self {
            label,
            kind,
            prev,
            curr,
        }
    }

    pub fn delta(&self) -> Delta {
        classify(self.kind, self.prev, self.curr)
    }

    /// 行文本，例如 `PP: 4,567.89`
    pub fn value_text(&self) -> String {
        format!("{}: {}", self.label, format_decimal(self.curr))
    }
}

/// 两次快照对应的九行指标（固定顺序）
pub fn metric_rows(prev: &SnapshotData, curr: &SnapshotData) -> Vec<Metric> {
    use MetricKind::{Rank, Value};

    let ss = |d: &SnapshotData| (d.counts.ss + d.counts.ssh) as f64;
    let s = |d: &SnapshotData| (d.counts.s + d.counts.sh) as f64;

    vec![
        Metric::new("Rank", Rank, prev.pp.rank as f64, curr.pp.rank as f64),
        Metric::new(
            "Country Rank",
            Rank,
            prev.pp.country_rank as f64,
            curr.pp.country_rank as f64,
        ),
        Metric::new("PP", Value, prev.pp.raw, curr.pp.raw),
        Metric::new(
            "Play Count",
            Value,
            prev.counts.plays as f64,
            curr.counts.plays as f64,
        ),
        Metric::new("Level", Value, prev.level, curr.level),
        Metric::new("Accuracy", Value, prev.accuracy, curr.accuracy),
        Metric::new("SS", Value, ss(prev), ss(curr)),
        Metric::new("S", Value, s(prev), s(curr)),
        Metric::new("A", Value, prev.counts.a as f64, curr.counts.a as f64),
    ]
}

/// 取整数部分并加千分位，小数部分非零时保留两位
pub fn format_decimal(x: f64) -> String {
    if !x.is_finite() {
        return "0".to_string();
    }
    // 补偿 0.1 一类二进制表示误差，避免 98.76 被截成 98.75
    let cents = (x.abs() * 100.0 + 1e-6).floor() as u64;
    let (int_part, frac_part) = (cents / 100, cents % 100);

    let mut out = String::new();
    if x < 0.0 && cents > 0 {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if frac_part != 0 {
        let _ = write!(out, ".{frac_part:02}");
    }
    out
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::osu::models::{HitCounts, Performance};

    #[test]
    fn rank_improvement_is_up_with_positive_magnitude() {
        let d = classify(MetricKind::Rank, 15_000.0, 14_250.0);
        assert_eq!(d.direction, Direction::Up);
        assert_eq!(d.magnitude, 750.0);

        let d = classify(MetricKind::Rank, 14_250.0, 15_000.0);
        assert_eq!(d.direction, Direction::Down);
        assert_eq!(d.magnitude, 750.0);
    }

    #[test]
    fn value_metrics_invert_the_sign() {
        let d = classify(MetricKind::Value, 4000.0, 4012.5);
        assert_eq!(d.direction, Direction::Up);
        assert_eq!(d.magnitude, 12.5);

        let d = classify(MetricKind::Value, 98.7, 98.2);
        assert_eq!(d.direction, Direction::Down);
        assert!((d.magnitude - 0.5).abs() < 1e-9);
    }

    #[test]
    fn equal_values_are_neutral_for_both_kinds() {
        for kind in [MetricKind::Rank, MetricKind::Value] {
            let d = classify(kind, 42.0, 42.0);
            assert_eq!(d.direction, Direction::Neutral);
            assert_eq!(d.magnitude, 0.0);
        }
    }

    #[test]
    fn classification_does_not_depend_on_row_order() {
        let prev = SnapshotData {
            counts: HitCounts {
                plays: 100,
                ss: 1,
                ssh: 1,
                a: 9,
                ..Default::default()
            },
            pp: Performance {
                raw: 1000.0,
                rank: 5000,
                country_rank: 100,
            },
            accuracy: 97.5,
            level: 80.2,
            ..Default::default()
        };
        let curr = SnapshotData {
            counts: HitCounts {
                plays: 130,
                ss: 2,
                ssh: 1,
                a: 9,
                ..Default::default()
            },
            pp: Performance {
                raw: 1010.0,
                rank: 4900,
                country_rank: 101,
            },
            accuracy: 97.4,
            level: 80.4,
            ..Default::default()
        };

        let forward: Vec<_> = metric_rows(&prev, &curr)
            .iter()
            .map(|m| (m.label, m.delta()))
            .collect();
        let mut backward: Vec<_> = metric_rows(&prev, &curr)
            .into_iter()
            .rev()
            .map(|m| (m.label, m.delta()))
            .collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 9);

        let by_label = |label: &str| forward.iter().find(|(l, _)| *l == label).unwrap().1;
        assert_eq!(by_label("Rank").direction, Direction::Up);
        assert_eq!(by_label("Country Rank").direction, Direction::Down);
        assert_eq!(by_label("SS").magnitude, 1.0);
        assert_eq!(by_label("A").direction, Direction::Neutral);
        assert_eq!(by_label("Accuracy").direction, Direction::Down);
    }

    #[test]
    fn format_decimal_floors_and_groups() {
        assert_eq!(format_decimal(1234.5), "1,234.50");
        assert_eq!(format_decimal(98.0), "98");
        assert_eq!(format_decimal(98.76), "98.76");
        assert_eq!(format_decimal(0.05), "0.05");
        assert_eq!(format_decimal(0.0), "0");
        assert_eq!(format_decimal(1_234_567.0), "1,234,567");
        assert_eq!(format_decimal(999.999), "999.99");
        assert_eq!(format_decimal(123.0), "123");
    }

    #[test]
    fn value_text_uses_current_value() {
        let m = Metric::new("Play Count", MetricKind::Value, 10.0, 12_345.0);
        assert_eq!(m.value_text(), "Play Count: 12,345");
    }
}
