use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::imaging::FrameStatistics;
use crate::seed::{frame_seed, uniform, SeedContext};

/// 各子分数在综合生育力分数中的权重
pub const WEIGHT_MOTION: f64 = 0.15;
pub const WEIGHT_POSTURE: f64 = 0.10;
pub const WEIGHT_BEHAVIOR: f64 = 0.25;
pub const WEIGHT_PHYSICAL: f64 = 0.15;
pub const WEIGHT_ESTRUS: f64 = 0.20;
pub const WEIGHT_DISTRESS: f64 = 0.10;
pub const WEIGHT_LOW_FERTILITY: f64 = 0.05;

/// 综合分数抖动幅度（±）
pub const FERTILITY_JITTER: f64 = 0.5;

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// 七个子分数，均在 [0, 100] 内
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub motion: f64,
    pub posture: f64,
    pub behavior: f64,
    pub physical: f64,
    pub estrus: f64,
    pub distress: f64,
    pub low_fertility: f64,
}

impl SubScores {
    /// 由像素统计量和时间戳（秒）计算七个子分数
    pub fn from_statistics(stats: &FrameStatistics, t: f64) -> Self {
        Self {
            motion: motion_score(stats),
            posture: posture_score(stats),
            behavior: behavior_score(t),
            physical: physical_score(stats),
            estrus: estrus_score(stats, t),
            distress: distress_score(stats, t),
            low_fertility: low_fertility_score(stats, t),
        }
    }

    /// 加权和（未加抖动、未截断）
    pub fn weighted_fertility(&self) -> f64 {
        self.motion * WEIGHT_MOTION
            + self.posture * WEIGHT_POSTURE
            + self.behavior * WEIGHT_BEHAVIOR
            + self.physical * WEIGHT_PHYSICAL
            + self.estrus * WEIGHT_ESTRUS
            + (100.0 - self.distress) * WEIGHT_DISTRESS
            + (100.0 - self.low_fertility) * WEIGHT_LOW_FERTILITY
    }
}

/// 活动量：灰度标准差 + Canny(50,150) 外轮廓数
pub fn motion_score(stats: &FrameStatistics) -> f64 {
    let activity = stats.std_dev / 255.0 * 100.0;
    clamp_score(60.0 + activity * 0.25 + stats.contour_count as f64 * 0.5)
}

/// 姿态：边缘密度 + 拉普拉斯稳定度
pub fn posture_score(stats: &FrameStatistics) -> f64 {
    let stability = 100.0 - stats.laplacian_variance / 1000.0;
    clamp_score(50.0 + stats.edge_density * 300.0 + stability * 0.2)
}

/// 行为：只依赖时间的周期函数
pub fn behavior_score(t: f64) -> f64 {
    let cycle = (t * 0.1).sin() * 15.0;
    let restlessness = (t * 0.7).sin() * 15.0 + 15.0;
    let social = (t * 0.4).cos() * 10.0 + 10.0;
    let feeding = (t * 0.3).sin() * 8.0 + 8.0;
    clamp_score(60.0 + cycle + restlessness + social + feeding)
}

/// 体况：纹理 + 亮部占比 - 暗部占比
pub fn physical_score(stats: &FrameStatistics) -> f64 {
    let texture = stats.laplacian_variance / 1000.0;
    let brightness = stats.bright_fraction * 100.0;
    let darkness = stats.dark_fraction * 100.0;
    clamp_score(55.0 + texture * 0.3 + brightness * 0.4 - darkness * 0.2)
}

/// 发情行为
pub fn estrus_score(stats: &FrameStatistics, t: f64) -> f64 {
    let frequency = (t * 0.5).sin().abs() * 40.0;
    let intensity = stats.std_dev / 255.0 * 100.0;
    let mounting = (t * 0.8).sin().abs() * 20.0;
    let vocalization = (t * 0.6).cos().abs() * 15.0;
    let score = 45.0 + frequency + intensity + mounting + vocalization + (t * 0.9).sin() * 8.0;
    clamp_score(score)
}

/// 应激指标
pub fn distress_score(stats: &FrameStatistics, t: f64) -> f64 {
    let motion_variance = stats.variance / 1000.0;
    let activity = (stats.mean - 128.0).abs();
    let breathing = (t * 3.0).sin().abs() * 30.0;
    let isolation = stats.edge_density_low * 50.0;
    clamp_score(motion_variance * 0.3 + activity * 0.2 + breathing + isolation)
}

/// 低生育力模式
pub fn low_fertility_score(stats: &FrameStatistics, t: f64) -> f64 {
    let estrus_activity = (t * 0.2).sin().abs() * 20.0;
    let body_condition = 100.0 - stats.laplacian_variance / 500.0;
    let posture_abnormality = stats.edge_density_high * 100.0;
    let social_isolation = (t * 0.1).cos().abs() * 25.0;
    let inconsistency = ((t * 0.3).sin() - (t * 0.4).cos()).abs() * 30.0;
    clamp_score(
        estrus_activity
            + (100.0 - body_condition) * 0.5
            + posture_abnormality * 0.3
            + social_isolation
            + inconsistency,
    )
}

/// 一个采样帧的评分结果，生成后不再修改
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// 时间戳（秒；帧率未知时为帧序号）
    pub timestamp: f64,
    pub scores: SubScores,
    pub fertility: f64,
}

/// 帧评分器
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameScorer;

impl FrameScorer {
    pub fn new() -> Self {
        Self
    }

    /// 对一帧评分
    ///
    /// 先按帧种子重新播种，因此相同的 (帧, 时间戳, 视频种子) 总是得到完全相同的结果。
    pub fn score(
        &self,
        frame: &GrayImage,
        timestamp: f64,
        seeds: &mut SeedContext,
    ) -> opencv::Result<FrameSample> {
        seeds.reseed_frame(frame_seed(seeds.video_seed(), timestamp));

        let stats = FrameStatistics::compute(frame)?;
        let scores = SubScores::from_statistics(&stats, timestamp);

        let jitter = uniform(&mut seeds.numeric, -FERTILITY_JITTER, FERTILITY_JITTER);
        let fertility = clamp_score(scores.weighted_fertility() + jitter);

        Ok(FrameSample {
            timestamp,
            scores,
            fertility,
        })
    }
}
