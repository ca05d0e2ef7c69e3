use serde::{Deserialize, Serialize};

use crate::frame_scorer::FrameSample;

/// 综合分数时间序列中的一点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePoint {
    pub timestamp: f64,
    pub fertility_score: f64,
}

/// 七个子分数的会话均值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureAnalysis {
    pub motion: f64,
    pub posture: f64,
    pub behavior: f64,
    pub physical_condition: f64,
    pub estrus_behavior: f64,
    pub distress_indicators: f64,
    pub low_fertility_patterns: f64,
}

/// 单帧全部分数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedFeature {
    pub timestamp: f64,
    pub motion_score: f64,
    pub posture_score: f64,
    pub behavior_score: f64,
    pub physical_score: f64,
    pub estrus_score: f64,
    pub distress_score: f64,
    pub low_fertility_score: f64,
    pub fertility_score: f64,
}

impl From<&FrameSample> for DetailedFeature {
    fn from(sample: &FrameSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            motion_score: sample.scores.motion,
            posture_score: sample.scores.posture,
            behavior_score: sample.scores.behavior,
            physical_score: sample.scores.physical,
            estrus_score: sample.scores.estrus,
            distress_score: sample.scores.distress,
            low_fertility_score: sample.scores.low_fertility,
            fertility_score: sample.fertility,
        }
    }
}

/// 应激事件 / 低生育力模式事件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub timestamp: f64,
    pub score: f64,
}

/// 哪些模拟覆盖生效了
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationTrace {
    /// 哈希取模覆盖
    pub demo: bool,
    /// 按配置概率触发的覆盖
    pub probabilistic: bool,
}

/// 一次视频分析的完整结果（历史记录与展示层消费的 JSON 记录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub fertility_percentage: f64,
    pub recommendation: String,
    pub frame_data: Vec<FramePoint>,
    pub video_duration: f64,
    pub frames_analyzed: usize,
    pub feature_analysis: FeatureAnalysis,
    pub detailed_features: Vec<DetailedFeature>,
    pub distress_indicators: Vec<ScoreEvent>,
    pub low_fertility_patterns: Vec<ScoreEvent>,
    /// 哈希取模覆盖是否生效
    pub simulated_low_fertility: bool,
    #[serde(default)]
    pub simulation: SimulationTrace,
}
