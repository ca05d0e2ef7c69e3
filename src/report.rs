use serde::Serialize;

use crate::auth::UserRecord;
use crate::history::PredictionRecord;
use crate::monitor::{AlertEntry, Reading};
use crate::result::SessionResult;

/// 详细报告：两列（指标, 值）
#[derive(Debug, Clone, Serialize)]
pub struct DetailedReport {
    pub rows: Vec<(String, String)>,
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value)
}

impl DetailedReport {
    pub fn from_result(result: &SessionResult) -> Self {
        let f = &result.feature_analysis;
        let rows = vec![
            ("Overall Fertility", percent(result.fertility_percentage)),
            ("Recommendation", result.recommendation.clone()),
            ("Analysis Duration", format!("{:.1} seconds", result.video_duration)),
            ("Frames Analyzed", result.frame_data.len().to_string()),
            ("Motion Score", percent(f.motion)),
            ("Posture Score", percent(f.posture)),
            ("Behavior Score", percent(f.behavior)),
            ("Physical Score", percent(f.physical_condition)),
            ("Estrus Score", percent(f.estrus_behavior)),
            ("Distress Indicators", percent(f.distress_indicators)),
            ("Low Fertility Patterns", percent(f.low_fertility_patterns)),
            ("Distress Events", result.distress_indicators.len().to_string()),
            ("Low Fertility Events", result.low_fertility_patterns.len().to_string()),
        ];

        Self {
            rows: rows.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    /// 渲染为 CSV（RFC 4180 引号规则）
    pub fn to_csv(&self) -> String {
        csv_table(
            &["Metric", "Value"],
            self.rows.iter().map(|(metric, value)| vec![metric.clone(), value.clone()]),
        )
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// 表头 + 数据行渲染为 CSV
fn csv_table<I>(header: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut out = header.join(",");
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// 监测读数导出：time, fertility, timestamp
///
/// 以下导出中的浮点列都用 `{:?}`，整数分数也保留 ".0"。
pub fn monitoring_csv(readings: &[Reading]) -> String {
    csv_table(
        &["time", "fertility", "timestamp"],
        readings
            .iter()
            .map(|r| vec![r.time.to_string(), format!("{:?}", r.fertility), r.timestamp.clone()]),
    )
}

/// 告警日志导出：time, score, message, type
pub fn alert_log_csv(alerts: &[AlertEntry]) -> String {
    csv_table(
        &["time", "score", "message", "type"],
        alerts.iter().map(|a| {
            vec![
                a.time.to_string(),
                format!("{:?}", a.score),
                a.message.clone(),
                a.level.as_str().to_string(),
            ]
        }),
    )
}

/// 管理员导出的全部预测记录，时间精确到分钟
pub fn system_data_csv(records: &[PredictionRecord]) -> String {
    csv_table(
        &[
            "timestamp",
            "username",
            "video_filename",
            "fertility_percentage",
            "recommendation",
        ],
        records.iter().map(|r| {
            let timestamp = r
                .recorded_at()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| r.timestamp.clone());
            vec![
                timestamp,
                r.username.clone(),
                r.video_filename.clone(),
                format!("{:?}", r.fertility_percentage),
                r.recommendation.clone(),
            ]
        }),
    )
}

/// 用户管理页的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub username: String,
    /// Admin 或 Farmer
    pub role: String,
    /// 注册日期（created_at 的前 10 个字符）
    pub created: String,
    pub total_predictions: usize,
    /// 没有记录时为 0
    pub average_fertility: f64,
    /// 高于阈值的记录数
    pub high_alerts: usize,
}

/// 按用户汇总预测历史
pub fn user_overview(
    users: &[(String, UserRecord)],
    history: &[PredictionRecord],
    threshold: f64,
) -> Vec<UserSummary> {
    users
        .iter()
        .map(|(username, record)| {
            let scores: Vec<f64> = history
                .iter()
                .filter(|h| &h.username == username)
                .map(|h| h.fertility_percentage)
                .collect();
            let average_fertility = if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            };
            UserSummary {
                username: username.clone(),
                role: if record.grants_admin(username) { "Admin" } else { "Farmer" }.to_string(),
                created: record.created_at.chars().take(10).collect(),
                total_predictions: scores.len(),
                average_fertility,
                high_alerts: scores.iter().filter(|&&s| s > threshold).count(),
            }
        })
        .collect()
}

/// 用户概览导出
pub fn user_overview_csv(rows: &[UserSummary]) -> String {
    csv_table(
        &[
            "Username",
            "Role",
            "Created",
            "Total Predictions",
            "Avg Fertility",
            "High Alerts",
        ],
        rows.iter().map(|u| {
            vec![
                u.username.clone(),
                u.role.clone(),
                u.created.clone(),
                u.total_predictions.to_string(),
                format!("{:.1}", u.average_fertility),
                u.high_alerts.to_string(),
            ]
        }),
    )
}
