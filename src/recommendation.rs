use serde::{Deserialize, Serialize};

/// 应激 / 低生育力均值超过该值时优先给出健康提示
const HEALTH_MEAN_THRESHOLD: f64 = 60.0;
/// 事件数超过该值时优先给出健康提示
const HEALTH_EVENT_THRESHOLD: usize = 5;

/// 综合分数的十档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FertilityBand {
    Optimal,
    High,
    Good,
    ModerateHigh,
    Moderate,
    LowModerate,
    Low,
    VeryLow,
    Minimal,
    Poor,
}

impl FertilityBand {
    pub fn classify(fertility: f64) -> Self {
        match fertility {
            f if f >= 90.0 => Self::Optimal,
            f if f >= 85.0 => Self::High,
            f if f >= 80.0 => Self::Good,
            f if f >= 75.0 => Self::ModerateHigh,
            f if f >= 70.0 => Self::Moderate,
            f if f >= 65.0 => Self::LowModerate,
            f if f >= 60.0 => Self::Low,
            f if f >= 55.0 => Self::VeryLow,
            f if f >= 50.0 => Self::Minimal,
            _ => Self::Poor,
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Self::Optimal => "✅ OPTIMAL FERTILITY: Peak fertility detected. Inseminate immediately for maximum conception rates. No health concerns detected.",
            Self::High => "✅ HIGH FERTILITY: Excellent fertility levels. Inseminate within 12 hours. No distress or health issues detected.",
            Self::Good => "✅ GOOD FERTILITY: Strong fertility signs. Inseminate within 24 hours. Continue regular health monitoring.",
            Self::ModerateHigh => "🟢 MODERATE-HIGH FERTILITY: Prepare for insemination within 48 hours. Monitor for peak fertility signs.",
            Self::Moderate => "🟢 MODERATE FERTILITY: Fertility indicators present. Continue monitoring every 12 hours for peak signs.",
            Self::LowModerate => "🟡 LOW-MODERATE FERTILITY: Early fertility signs detected. Monitor closely for improvement over next 24-48 hours.",
            Self::Low => "🟡 LOW FERTILITY: Minimal fertility indicators. Continue monitoring and consider veterinary consultation.",
            Self::VeryLow => "⚠️ VERY LOW FERTILITY: Subtle signs present. Veterinary assessment recommended to rule out health issues.",
            Self::Minimal => "⚠️ MINIMAL FERTILITY: Low indicators detected. Immediate veterinary examination advised.",
            Self::Poor => "🔴 POOR FERTILITY: No significant fertility indicators. Urgent veterinary attention required to assess health.",
        }
    }
}

/// 根据会话均值和事件数生成建议文本
///
/// 优先级：应激 > 低生育力模式 > 十档综合分数。
pub fn generate_recommendation(
    fertility: f64,
    distress: f64,
    low_fertility: f64,
    distress_count: usize,
    low_fertility_count: usize,
) -> String {
    if distress > HEALTH_MEAN_THRESHOLD || distress_count > HEALTH_EVENT_THRESHOLD {
        return format!(
            "⚠️ ANIMAL HEALTH CONCERN: High distress indicators detected ({:.1}%). Veterinary attention recommended immediately. Fertility score: {:.1}%",
            distress, fertility
        );
    }

    if low_fertility > HEALTH_MEAN_THRESHOLD || low_fertility_count > HEALTH_EVENT_THRESHOLD {
        return if fertility >= 85.0 {
            format!(
                "⚠️ HEALTH ALERT: Low fertility patterns detected despite high fertility score ({:.1}%). Monitor closely for health issues.",
                fertility
            )
        } else if fertility >= 75.0 {
            format!(
                "⚠️ HEALTH MONITORING: Low fertility patterns with moderate fertility ({:.1}%). Veterinary consultation recommended.",
                fertility
            )
        } else {
            format!(
                "⚠️ HEALTH CONCERN: Multiple low fertility indicators. Fertility score {:.1}%. Immediate veterinary assessment needed.",
                fertility
            )
        };
    }

    FertilityBand::classify(fertility).advice().to_string()
}
