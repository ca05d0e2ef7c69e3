use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{info, warn};

use crate::result::ScoreEvent;
use crate::seed::{uniform, SeedContext};

/// 按概率触发的低生育力模拟配置
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// 是否启用
    pub enabled: bool,
    /// 触发概率 [0, 1]
    pub probability: f64,
    /// 使用系统熵源而不是视频种子
    pub nondeterministic: bool,
    /// 覆盖后综合分数的下限 [0, 100]
    pub min: f64,
    /// 覆盖后综合分数的上限 [min, 100]
    pub max: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: 0.0,
            nondeterministic: false,
            min: 40.0,
            max: 60.0,
        }
    }
}

impl SimulationConfig {
    /// 规范化：概率截断到 [0,1]，区间截断到 [0,100] 且 min <= max
    pub fn normalized(self) -> Self {
        let min = self.min.clamp(0.0, 100.0);
        let max = self.max.min(100.0).max(min);
        Self {
            probability: self.probability.clamp(0.0, 1.0),
            min,
            max,
            ..self
        }
    }

    /// 上传策略：用户前两次上传以 70% 概率模拟低生育力，之后降为 30%
    pub fn for_upload_count(prior_uploads: usize) -> Self {
        let probability = if prior_uploads < 2 { 0.7 } else { 0.3 };
        Self {
            enabled: true,
            probability,
            nondeterministic: true,
            min: 30.0,
            max: 45.0,
        }
    }
}

/// 覆盖逻辑可以改写的会话级数值
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAggregate {
    pub fertility: f64,
    pub distress: f64,
    pub low_fertility: f64,
    pub distress_events: Vec<ScoreEvent>,
    pub low_fertility_events: Vec<ScoreEvent>,
}

/// 哈希取模覆盖：视频种子能被 3 整除时强制生成一个低生育力场景
///
/// 通用发生器按视频种子重新播种后依次抽取：综合分数、应激均值、低生育力均值、
/// 应激事件数及每个事件（时间戳、分数）、低生育力事件数及每个事件。
pub fn apply_demo_override(
    duration: f64,
    aggregate: &mut SessionAggregate,
    seeds: &mut SeedContext,
) -> bool {
    if seeds.video_seed() % 3 != 0 {
        return false;
    }

    seeds.reseed_video();
    let rng = &mut seeds.general;

    aggregate.fertility = uniform(rng, 30.0, 45.0);
    aggregate.distress = uniform(rng, 50.0, 70.0);
    aggregate.low_fertility = uniform(rng, 60.0, 80.0);
    aggregate.distress_events = synthetic_events(rng, duration, 3..=7, (65.0, 85.0));
    aggregate.low_fertility_events = synthetic_events(rng, duration, 2..=5, (60.0, 80.0));

    warn!(
        "🎭 [模拟覆盖] 视频种子 {} 触发演示覆盖，综合分数改为 {:.1}",
        seeds.video_seed(),
        aggregate.fertility
    );
    true
}

fn synthetic_events<R: Rng + ?Sized>(
    rng: &mut R,
    duration: f64,
    count: std::ops::RangeInclusive<usize>,
    (lo, hi): (f64, f64),
) -> Vec<ScoreEvent> {
    let n = rng.gen_range(count);
    (0..n)
        .map(|i| {
            let timestamp = if duration > 0.0 {
                uniform(rng, 0.0, duration)
            } else {
                i as f64
            };
            ScoreEvent {
                timestamp,
                score: uniform(rng, lo, hi),
            }
        })
        .collect()
}

/// 按配置概率触发的覆盖，在哈希取模覆盖之后执行，效果叠加
///
/// 是否触发总是用通用发生器判定；触发后的抽样在 `nondeterministic` 时改用系统熵源。
pub fn apply_probabilistic_override(
    config: &SimulationConfig,
    duration: f64,
    aggregate: &mut SessionAggregate,
    seeds: &mut SeedContext,
) -> bool {
    let config = config.clone().normalized();
    if !config.enabled {
        return false;
    }
    if seeds.general.gen::<f64>() >= config.probability {
        return false;
    }

    let mut system_rng;
    let rng: &mut dyn RngCore = if config.nondeterministic {
        system_rng = StdRng::from_entropy();
        &mut system_rng
    } else {
        &mut seeds.general
    };

    aggregate.fertility = uniform(rng, config.min, config.max);
    aggregate.low_fertility = aggregate.low_fertility.max(uniform(rng, 65.0, 85.0));
    aggregate.distress = aggregate.distress.max(uniform(rng, 45.0, 65.0));

    let extra = rng.gen_range(2..=6usize);
    for i in 0..extra {
        let timestamp = if duration > 0.0 {
            (i + 1) as f64 * (duration / (extra + 1) as f64)
        } else {
            i as f64
        };
        aggregate.low_fertility_events.push(ScoreEvent {
            timestamp,
            score: uniform(rng, 70.0, 90.0),
        });
    }

    let jitter = uniform(rng, -2.5, 2.5);
    aggregate.fertility = (aggregate.fertility + jitter).clamp(0.0, 100.0);

    info!(
        "🎲 [模拟覆盖] 概率覆盖触发（p={:.2}），综合分数改为 {:.1}",
        config.probability, aggregate.fertility
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate() -> SessionAggregate {
        SessionAggregate {
            fertility: 88.0,
            distress: 12.0,
            low_fertility: 20.0,
            distress_events: vec![],
            low_fertility_events: vec![ScoreEvent { timestamp: 1.0, score: 75.0 }],
        }
    }

    #[test]
    fn test_demo_override_only_for_multiples_of_three() {
        let mut agg = aggregate();
        let mut seeds = SeedContext::new(7);
        assert!(!apply_demo_override(10.0, &mut agg, &mut seeds));
        assert_eq!(agg, aggregate());

        let mut seeds = SeedContext::new(9);
        assert!(apply_demo_override(10.0, &mut agg, &mut seeds));
        assert!((30.0..45.0).contains(&agg.fertility));
        assert!((50.0..70.0).contains(&agg.distress));
        assert!((60.0..80.0).contains(&agg.low_fertility));
        assert!((3..=7).contains(&agg.distress_events.len()));
        assert!((2..=5).contains(&agg.low_fertility_events.len()));
        for e in &agg.distress_events {
            assert!((0.0..10.0).contains(&e.timestamp));
            assert!((65.0..85.0).contains(&e.score));
        }
        for e in &agg.low_fertility_events {
            assert!((0.0..10.0).contains(&e.timestamp));
            assert!((60.0..80.0).contains(&e.score));
        }
    }

    #[test]
    fn test_demo_override_is_reproducible_and_uses_index_without_duration() {
        let mut a = aggregate();
        let mut b = aggregate();
        apply_demo_override(0.0, &mut a, &mut SeedContext::new(300));
        apply_demo_override(0.0, &mut b, &mut SeedContext::new(300));
        assert_eq!(a, b);
        for (i, e) in a.distress_events.iter().enumerate() {
            assert_eq!(e.timestamp, i as f64);
        }
    }

    #[test]
    fn test_probabilistic_override_disabled_or_zero_probability() {
        let mut agg = aggregate();
        let mut seeds = SeedContext::new(1);
        assert!(!apply_probabilistic_override(&SimulationConfig::default(), 5.0, &mut agg, &mut seeds));

        let config = SimulationConfig {
            enabled: true,
            probability: 0.0,
            ..SimulationConfig::default()
        };
        assert!(!apply_probabilistic_override(&config, 5.0, &mut agg, &mut seeds));
        assert_eq!(agg, aggregate());
    }

    #[test]
    fn test_probabilistic_override_forces_range() {
        for nondeterministic in [false, true] {
            let config = SimulationConfig {
                enabled: true,
                probability: 1.0,
                nondeterministic,
                min: 10.0,
                max: 20.0,
            };
            let mut agg = aggregate();
            let mut seeds = SeedContext::new(1);
            assert!(apply_probabilistic_override(&config, 12.0, &mut agg, &mut seeds));

            assert!(agg.fertility >= 7.5 && agg.fertility <= 22.5);
            assert!(agg.low_fertility >= 65.0);
            assert!(agg.distress >= 45.0);

            // 原有事件保留，追加的 2..=6 个事件均匀分布在时长上
            let extra = &agg.low_fertility_events[1..];
            assert!((2..=6).contains(&extra.len()));
            let step = 12.0 / (extra.len() + 1) as f64;
            for (i, e) in extra.iter().enumerate() {
                assert!((e.timestamp - step * (i + 1) as f64).abs() < 1e-9);
                assert!((70.0..90.0).contains(&e.score));
            }
        }
    }

    #[test]
    fn test_normalized_config() {
        let config = SimulationConfig {
            enabled: true,
            probability: 3.0,
            nondeterministic: false,
            min: 120.0,
            max: 50.0,
        }
        .normalized();
        assert_eq!(config.probability, 1.0);
        assert_eq!(config.min, 100.0);
        assert_eq!(config.max, 100.0);

        let config = SimulationConfig {
            min: -5.0,
            max: 30.0,
            ..SimulationConfig::default()
        }
        .normalized();
        assert_eq!((config.min, config.max), (0.0, 30.0));
    }

    #[test]
    fn test_upload_policy() {
        assert_eq!(SimulationConfig::for_upload_count(0).probability, 0.7);
        assert_eq!(SimulationConfig::for_upload_count(1).probability, 0.7);
        let later = SimulationConfig::for_upload_count(2);
        assert_eq!(later.probability, 0.3);
        assert!(later.enabled && later.nondeterministic);
        assert_eq!((later.min, later.max), (30.0, 45.0));
    }
}
