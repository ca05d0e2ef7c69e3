use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::history::PredictionRecord;

/// 低于该分数的读数标记为 LOW
pub const LOW_FERTILITY_LEVEL: f64 = 30.0;
/// 阈值下方多少分开始 CAUTION
pub const CAUTION_MARGIN: f64 = 5.0;
/// 汇总时“最近平均”取的点数
pub const RECENT_WINDOW: usize = 5;
/// 预测多少秒之后的分数
pub const FORECAST_HORIZON_SECS: f64 = 300.0;

/// 实时监测参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// 监测时长（分钟，1-60）
    pub duration_minutes: u32,
    /// 读数间隔（秒，1-30）
    pub update_interval: u32,
    /// 灵敏度（1-10），越高噪声越小
    pub sensitivity: u32,
    /// 告警阈值（50-95）
    pub alert_threshold: f64,
    /// 是否记录告警日志
    pub log_alerts: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            duration_minutes: 15,
            update_interval: 3,
            sensitivity: 7,
            alert_threshold: 80.0,
            log_alerts: true,
        }
    }
}

impl MonitorSettings {
    /// 默认参数，告警阈值取仪表盘阈值
    pub fn with_threshold(alert_threshold: f64) -> Self {
        Self {
            alert_threshold,
            ..Self::default()
        }
        .normalized()
    }

    /// 各参数截断到允许范围
    pub fn normalized(self) -> Self {
        let alert_threshold = if self.alert_threshold.is_finite() {
            self.alert_threshold.clamp(50.0, 95.0)
        } else {
            Self::default().alert_threshold
        };
        Self {
            duration_minutes: self.duration_minutes.clamp(1, 60),
            update_interval: self.update_interval.clamp(1, 30),
            sensitivity: self.sensitivity.clamp(1, 10),
            alert_threshold,
            log_alerts: self.log_alerts,
        }
    }

    /// 读数个数：时长秒数整除间隔
    pub fn total_intervals(&self) -> u32 {
        self.duration_minutes * 60 / self.update_interval.max(1)
    }

    /// 读数噪声的标准差
    pub fn noise_std_dev(&self) -> f64 {
        (11.0 - self.sensitivity as f64) / 3.0
    }
}

/// 相邻读数的变化趋势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    StronglyDecreasing,
    Decreasing,
    Stable,
    Increasing,
    StronglyIncreasing,
}

impl Trend {
    /// 按与上一读数的差值分类
    ///
    /// 差值恰好为 ±1 时不落入任何区间，返回 None，调用方沿用上一趋势。
    pub fn classify(diff: f64) -> Option<Self> {
        if diff.abs() < 1.0 {
            Some(Trend::Stable)
        } else if diff > 3.0 {
            Some(Trend::StronglyIncreasing)
        } else if diff > 1.0 {
            Some(Trend::Increasing)
        } else if diff < -3.0 {
            Some(Trend::StronglyDecreasing)
        } else if diff < -1.0 {
            Some(Trend::Decreasing)
        } else {
            None
        }
    }

    /// 整段回归斜率（每秒）对应的总体趋势
    pub fn from_slope(slope: f64) -> Self {
        if slope > 0.05 {
            Trend::Increasing
        } else if slope < -0.05 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn strength(&self) -> i8 {
        match self {
            Trend::StronglyDecreasing => -2,
            Trend::Decreasing => -1,
            Trend::Stable => 0,
            Trend::Increasing => 1,
            Trend::StronglyIncreasing => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trend::StronglyDecreasing => "↘️ Strongly Decreasing",
            Trend::Decreasing => "↘️ Decreasing",
            Trend::Stable => "➡️ Stable",
            Trend::Increasing => "↗️ Increasing",
            Trend::StronglyIncreasing => "↗️ Strongly Increasing",
        }
    }
}

/// 单个读数的告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
    Warning,
    Info,
    Normal,
}

impl AlertLevel {
    pub fn classify(score: f64, threshold: f64) -> Self {
        if score > threshold {
            AlertLevel::Critical
        } else if score > threshold - CAUTION_MARGIN {
            AlertLevel::Warning
        } else if score < LOW_FERTILITY_LEVEL {
            AlertLevel::Info
        } else {
            AlertLevel::Normal
        }
    }

    /// 只有 critical 和 warning 进入告警日志
    pub fn is_triggered(&self) -> bool {
        matches!(self, AlertLevel::Critical | AlertLevel::Warning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
            AlertLevel::Info => "info",
            AlertLevel::Normal => "normal",
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "🔴 HIGH ALERT",
            AlertLevel::Warning => "🟡 CAUTION",
            AlertLevel::Info => "🔵 LOW",
            AlertLevel::Normal => "🟢 NORMAL",
        }
    }

    pub fn message(&self, score: f64) -> String {
        match self {
            AlertLevel::Critical => format!(
                "⚠️ CRITICAL: High fertility detected ({:.1}%)! Immediate action recommended.",
                score
            ),
            AlertLevel::Warning => {
                format!("⚠️ WARNING: Approaching high fertility threshold ({:.1}%).", score)
            }
            AlertLevel::Info => format!("ℹ️ INFO: Low fertility levels detected ({:.1}%).", score),
            AlertLevel::Normal => format!("✅ Normal fertility levels ({:.1}%).", score),
        }
    }
}

/// 一个监测读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// 距监测开始的秒数
    pub time: u32,
    pub fertility: f64,
    /// 读数时刻 (HH:MM:SS)
    pub timestamp: String,
    pub trend: Trend,
    pub level: AlertLevel,
}

/// 告警日志的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub time: u32,
    pub score: f64,
    pub message: String,
    pub level: AlertLevel,
}

/// 监测结束后的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub average: f64,
    pub peak: f64,
    pub lowest: f64,
    /// 总体标准差，也作为波动度
    pub std_dev: f64,
    /// 最后 5 个读数的均值
    pub recent_average: f64,
    /// 高于阈值的读数
    pub critical_alerts: usize,
    /// 阈值下方 5 分以内的读数
    pub warning_alerts: usize,
    /// 告警读数占比（%）
    pub alert_rate: f64,
    /// 最小二乘斜率（每秒），少于两个读数时为空
    pub slope: Option<f64>,
    pub final_trend: Option<Trend>,
    /// 5 分钟后的外推分数
    pub forecast: Option<f64>,
}

impl MonitorSummary {
    pub fn from_readings(readings: &[Reading], threshold: f64) -> Option<Self> {
        let last = readings.last()?;
        let n = readings.len() as f64;
        let scores: Vec<f64> = readings.iter().map(|r| r.fertility).collect();

        let average = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - average).powi(2)).sum::<f64>() / n;
        let recent = &scores[scores.len().saturating_sub(RECENT_WINDOW)..];

        let critical_alerts = scores.iter().filter(|&&s| s > threshold).count();
        let warning_alerts = scores
            .iter()
            .filter(|&&s| s > threshold - CAUTION_MARGIN && s <= threshold)
            .count();

        let slope = if readings.len() > 1 {
            least_squares_slope(readings)
        } else {
            None
        };

        Some(Self {
            average,
            peak: scores.iter().cloned().fold(f64::MIN, f64::max),
            lowest: scores.iter().cloned().fold(f64::MAX, f64::min),
            std_dev: variance.sqrt(),
            recent_average: recent.iter().sum::<f64>() / recent.len() as f64,
            critical_alerts,
            warning_alerts,
            alert_rate: (critical_alerts + warning_alerts) as f64 / n * 100.0,
            slope,
            final_trend: slope.map(Trend::from_slope),
            forecast: slope.map(|s| (last.fertility + s * FORECAST_HORIZON_SECS).clamp(0.0, 100.0)),
        })
    }
}

/// 读数时间对分数的一次线性回归斜率
fn least_squares_slope(readings: &[Reading]) -> Option<f64> {
    let n = readings.len() as f64;
    let mean_x = readings.iter().map(|r| r.time as f64).sum::<f64>() / n;
    let mean_y = readings.iter().map(|r| r.fertility).sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for r in readings {
        let dx = r.time as f64 - mean_x;
        sxy += dx * (r.fertility - mean_y);
        sxx += dx * dx;
    }
    (sxx > 0.0).then(|| sxy / sxx)
}

/// 一次完整的监测会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSession {
    pub video_filename: String,
    pub base_fertility: f64,
    pub recommendation: String,
    pub settings: MonitorSettings,
    pub readings: Vec<Reading>,
    pub alerts: Vec<AlertEntry>,
    pub summary: Option<MonitorSummary>,
}

/// 在用户历史里挑选监测对象：指定文件名时取最近一条同名记录，否则取最近一条
pub fn select_record<'a>(
    records: &'a [PredictionRecord],
    video_filename: Option<&str>,
) -> Option<&'a PredictionRecord> {
    match video_filename {
        Some(name) => records.iter().rev().find(|r| r.video_filename == name),
        None => records.last(),
    }
}

/// 以一条历史预测的综合分数为基准，模拟一段实时监测
///
/// 每个读数 = 基准分数 + N(0, (11 - 灵敏度) / 3)，截断到 [0, 100]。
/// 读数不等待真实时间，`started_at` 只用于生成读数时刻。
pub fn run_monitor<R: Rng + ?Sized>(
    record: &PredictionRecord,
    settings: MonitorSettings,
    started_at: NaiveDateTime,
    rng: &mut R,
) -> Result<MonitorSession, NormalError> {
    let settings = settings.normalized();
    let noise = Normal::new(0.0, settings.noise_std_dev())?;
    let base = record.fertility_percentage;
    let total = settings.total_intervals();

    info!(
        "📡 [实时监测] 开始: {} (基准 {:.1}%), {} 个读数, 间隔 {}s, 阈值 {:.0}",
        record.video_filename, base, total, settings.update_interval, settings.alert_threshold
    );

    let mut readings: Vec<Reading> = Vec::with_capacity(total as usize);
    let mut alerts = Vec::new();
    let mut trend = Trend::Stable;

    for i in 0..total {
        let fertility = (base + noise.sample(rng)).clamp(0.0, 100.0);
        let time = i * settings.update_interval;

        if let Some(prev) = readings.last() {
            if let Some(next) = Trend::classify(fertility - prev.fertility) {
                trend = next;
            }
        }

        let level = AlertLevel::classify(fertility, settings.alert_threshold);
        if level.is_triggered() && settings.log_alerts {
            alerts.push(AlertEntry {
                time,
                score: fertility,
                message: level.message(fertility),
                level,
            });
        }
        debug!("读数 {}s: {:.1}% {} {}", time, fertility, level.status(), trend.label());

        readings.push(Reading {
            time,
            fertility,
            timestamp: (started_at + Duration::seconds(time as i64)).format("%H:%M:%S").to_string(),
            trend,
            level,
        });
    }

    let summary = MonitorSummary::from_readings(&readings, settings.alert_threshold);
    if let Some(s) = &summary {
        info!(
            "✅ [实时监测] 完成: 平均 {:.1}%, 峰值 {:.1}%, 严重告警 {}, 警告 {}",
            s.average, s.peak, s.critical_alerts, s.warning_alerts
        );
    }

    Ok(MonitorSession {
        video_filename: record.video_filename.clone(),
        base_fertility: base,
        recommendation: record.recommendation.clone(),
        settings,
        readings,
        alerts,
        summary,
    })
}
