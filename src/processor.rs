use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::error::AnalysisError;
use crate::frame_scorer::{FrameSample, FrameScorer};
use crate::recommendation::generate_recommendation;
use crate::result::{DetailedFeature, FeatureAnalysis, FramePoint, ScoreEvent, SessionResult, SimulationTrace};
use crate::seed::{video_seed, SeedContext};
use crate::simulation::{
    apply_demo_override, apply_probabilistic_override, SessionAggregate, SimulationConfig,
};
use crate::video_processor::{FrameSource, VideoProcessor};

/// 子分数超过该值的帧记为事件
pub const EVENT_THRESHOLD: f64 = 70.0;

/// 帧率未知时的采样间隔（帧）
pub const FALLBACK_SAMPLE_INTERVAL: u64 = 15;

/// 采样间隔：约每秒两帧
pub fn sample_interval(fps: f64) -> u64 {
    if fps > 0.0 {
        ((fps / 2.0) as u64).max(1)
    } else {
        FALLBACK_SAMPLE_INTERVAL
    }
}

/// 帧时间戳（秒）；帧率未知时退化为帧序号
pub fn frame_timestamp(frame_idx: u64, fps: f64) -> f64 {
    if fps > 0.0 {
        frame_idx as f64 / fps
    } else {
        frame_idx as f64
    }
}

/// 逐帧累积采样结果和事件
#[derive(Debug, Default, Clone)]
pub struct SessionAccumulator {
    samples: Vec<FrameSample>,
    distress_events: Vec<ScoreEvent>,
    low_fertility_events: Vec<ScoreEvent>,
}

impl SessionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: FrameSample) {
        if sample.scores.distress > EVENT_THRESHOLD {
            self.distress_events.push(ScoreEvent {
                timestamp: sample.timestamp,
                score: sample.scores.distress,
            });
        }
        if sample.scores.low_fertility > EVENT_THRESHOLD {
            self.low_fertility_events.push(ScoreEvent {
                timestamp: sample.timestamp,
                score: sample.scores.low_fertility,
            });
        }
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[FrameSample] {
        &self.samples
    }

    pub fn distress_events(&self) -> &[ScoreEvent] {
        &self.distress_events
    }

    pub fn low_fertility_events(&self) -> &[ScoreEvent] {
        &self.low_fertility_events
    }

    fn mean_of(&self, f: impl Fn(&FrameSample) -> f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(f).sum::<f64>() / self.samples.len() as f64
    }

    /// 七个子分数的均值
    pub fn feature_means(&self) -> FeatureAnalysis {
        FeatureAnalysis {
            motion: self.mean_of(|s| s.scores.motion),
            posture: self.mean_of(|s| s.scores.posture),
            behavior: self.mean_of(|s| s.scores.behavior),
            physical_condition: self.mean_of(|s| s.scores.physical),
            estrus_behavior: self.mean_of(|s| s.scores.estrus),
            distress_indicators: self.mean_of(|s| s.scores.distress),
            low_fertility_patterns: self.mean_of(|s| s.scores.low_fertility),
        }
    }

    /// 综合分数均值
    pub fn fertility_mean(&self) -> f64 {
        self.mean_of(|s| s.fertility)
    }
}

/// 分析视频文件
///
/// 打开失败、没有采样到帧以及解码过程中的任何错误都记录日志后以 `AnalysisError`
/// 返回，不会返回部分结果。视频源在函数返回前释放。
pub fn analyze_video(
    input_video_path: impl AsRef<Path>,
    config: &SimulationConfig,
) -> Result<SessionResult, AnalysisError> {
    let input_video_path = input_video_path.as_ref();
    let total_start = Instant::now();
    info!("🎬 [生育力分析] 开始分析视频: {}", input_video_path.display());

    let result = open_and_analyze(input_video_path, config);

    match &result {
        Ok(session) => info!(
            "✅ [生育力分析] 分析完成，综合分数 {:.1}%，采样 {} 帧，总耗时: {:.2}秒",
            session.fertility_percentage,
            session.frames_analyzed,
            total_start.elapsed().as_secs_f64()
        ),
        Err(e) => error!("❌ [生育力分析] 分析失败: {}: {}", input_video_path.display(), e),
    }
    result
}

fn open_and_analyze(
    input_video_path: &Path,
    config: &SimulationConfig,
) -> Result<SessionResult, AnalysisError> {
    let seed = video_seed(input_video_path).map_err(|e| {
        AnalysisError::UnopenableSource(format!("{}: {}", input_video_path.display(), e))
    })?;
    debug!("视频种子: {}", seed);

    let mut processor = VideoProcessor::open(input_video_path)
        .map_err(|e| AnalysisError::UnopenableSource(format!("{:#}", e)))?;
    let (width, height) = processor.resolution();
    info!(
        "  • 分辨率: {}x{}, 帧率: {:.2} fps, 帧数: {}",
        width,
        height,
        processor.fps(),
        processor.frame_count()
    );

    analyze_frames(&mut processor, seed, config)
}

/// 吞掉所有错误的分析入口：要么完整结果，要么 `None`
pub fn analyze_video_lenient(
    input_video_path: impl AsRef<Path>,
    config: &SimulationConfig,
) -> Option<SessionResult> {
    analyze_video(input_video_path, config).ok()
}

/// 对任意帧源执行完整的采样、聚合、覆盖和建议生成
pub fn analyze_frames(
    source: &mut dyn FrameSource,
    video_seed: u32,
    config: &SimulationConfig,
) -> Result<SessionResult, AnalysisError> {
    let fps = source.fps();
    let duration = source.duration();
    let interval = sample_interval(fps);

    let mut seeds = SeedContext::new(video_seed);
    let scorer = FrameScorer::new();
    let mut acc = SessionAccumulator::new();

    let sweep_start = Instant::now();
    let mut frame_idx: u64 = 0;
    loop {
        if frame_idx % interval == 0 {
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let sample = scorer.score(&frame, frame_timestamp(frame_idx, fps), &mut seeds)?;
            debug!(
                "帧 {} @ {:.2}s: 综合 {:.1}, 应激 {:.1}, 低生育力 {:.1}",
                frame_idx,
                sample.timestamp,
                sample.fertility,
                sample.scores.distress,
                sample.scores.low_fertility
            );
            acc.push(sample);
        } else if !source.skip_frame()? {
            break;
        }
        frame_idx += 1;
    }
    info!(
        "✅ [生育力分析] 帧扫描完成: {} 帧中采样 {} 帧（间隔 {}），耗时: {:.2}秒",
        frame_idx,
        acc.len(),
        interval,
        sweep_start.elapsed().as_secs_f64()
    );

    if acc.is_empty() {
        return Err(AnalysisError::EmptySampleSet);
    }

    let mut features = acc.feature_means();
    let mut aggregate = SessionAggregate {
        fertility: acc.fertility_mean(),
        distress: features.distress_indicators,
        low_fertility: features.low_fertility_patterns,
        distress_events: acc.distress_events().to_vec(),
        low_fertility_events: acc.low_fertility_events().to_vec(),
    };

    let simulation = SimulationTrace {
        demo: apply_demo_override(duration, &mut aggregate, &mut seeds),
        probabilistic: apply_probabilistic_override(config, duration, &mut aggregate, &mut seeds),
    };

    features.distress_indicators = aggregate.distress;
    features.low_fertility_patterns = aggregate.low_fertility;

    let recommendation = generate_recommendation(
        aggregate.fertility,
        aggregate.distress,
        aggregate.low_fertility,
        aggregate.distress_events.len(),
        aggregate.low_fertility_events.len(),
    );

    let samples = acc.samples();
    Ok(SessionResult {
        fertility_percentage: aggregate.fertility,
        recommendation,
        frame_data: samples
            .iter()
            .map(|s| FramePoint {
                timestamp: s.timestamp,
                fertility_score: s.fertility,
            })
            .collect(),
        video_duration: duration,
        frames_analyzed: samples.len(),
        feature_analysis: features,
        detailed_features: samples.iter().map(DetailedFeature::from).collect(),
        distress_indicators: aggregate.distress_events,
        low_fertility_patterns: aggregate.low_fertility_events,
        simulated_low_fertility: simulation.demo,
        simulation,
    })
}
