use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::recommendation::FertilityBand;
use crate::store::{read_json_or_default, write_json_atomic, StoreLock};

/// ISO-8601 本地时间（微秒精度）
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
/// 解析时允许没有小数部分
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// 一条预测历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub username: String,
    pub timestamp: String,
    pub video_filename: String,
    pub fertility_percentage: f64,
    pub recommendation: String,
}

impl PredictionRecord {
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_PARSE_FORMAT).ok()
    }
}

/// 扁平 JSON 文件形式的历史记录
///
/// 克隆共享同一把写锁，并发保存不会丢记录。
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    lock: StoreLock,
}

impl HistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: StoreLock::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录并整体重写文件
    pub fn save_prediction(
        &self,
        username: &str,
        video_filename: &str,
        fertility_percentage: f64,
        recommendation: &str,
    ) -> Result<PredictionRecord, StoreError> {
        let record = PredictionRecord {
            username: username.to_string(),
            timestamp: Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string(),
            video_filename: video_filename.to_string(),
            fertility_percentage,
            recommendation: recommendation.to_string(),
        };

        let _guard = self.lock.acquire();
        let mut history = self.load_history();
        history.push(record.clone());
        write_json_atomic(&self.path, &history)?;
        Ok(record)
    }

    /// 读取全部记录；文件不存在或损坏时返回空列表
    pub fn load_history(&self) -> Vec<PredictionRecord> {
        read_json_or_default(&self.path, "历史记录文件")
    }

    pub fn user_history(&self, username: &str) -> Vec<PredictionRecord> {
        self.load_history()
            .into_iter()
            .filter(|r| r.username == username)
            .collect()
    }

    /// 删除历史文件
    pub fn clear_history(&self) -> Result<(), StoreError> {
        let _guard = self.lock.acquire();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 仪表盘侧栏的汇总数字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_predictions: usize,
    pub average_fertility: Option<f64>,
    /// 综合分数高于阈值的记录数
    pub high_fertility_count: usize,
    pub last_7_days: usize,
    pub last_30_days: usize,
    pub last_analysis: Option<String>,
    /// 最近一次分析所在的档位
    pub last_band: Option<FertilityBand>,
}

impl HistoryStats {
    pub fn from_records(records: &[PredictionRecord], threshold: f64, now: NaiveDateTime) -> Self {
        let average_fertility = if records.is_empty() {
            None
        } else {
            Some(records.iter().map(|r| r.fertility_percentage).sum::<f64>() / records.len() as f64)
        };

        let latest = records.iter().max_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let dated: Vec<NaiveDateTime> = records.iter().filter_map(|r| r.recorded_at()).collect();

        Self {
            total_predictions: records.len(),
            average_fertility,
            high_fertility_count: records
                .iter()
                .filter(|r| r.fertility_percentage > threshold)
                .count(),
            last_7_days: dated.iter().filter(|t| (now - **t).num_days() <= 7).count(),
            last_30_days: dated.iter().filter(|t| **t > now - Duration::days(30)).count(),
            last_analysis: latest.map(|r| r.timestamp.clone()),
            last_band: latest.map(|r| FertilityBand::classify(r.fertility_percentage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str, timestamp: &str, fertility: f64) -> PredictionRecord {
        PredictionRecord {
            username: username.to_string(),
            timestamp: timestamp.to_string(),
            video_filename: "cow.mp4".to_string(),
            fertility_percentage: fertility,
            recommendation: "ok".to_string(),
        }
    }

    #[test]
    fn test_save_load_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        assert!(store.load_history().is_empty());

        store.save_prediction("farmer1", "a.mp4", 82.5, "good").unwrap();
        store.save_prediction("farmer2", "b.mp4", 41.0, "poor").unwrap();
        store.save_prediction("farmer1", "c.mp4", 90.0, "optimal").unwrap();

        let all = store.load_history();
        assert_eq!(all.len(), 3);
        assert!(all[0].recorded_at().is_some());

        let mine = store.user_history("farmer1");
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[1].video_filename, "c.mp4");

        store.clear_history().unwrap();
        assert!(store.load_history().is_empty());
        // 重复清空不报错
        store.clear_history().unwrap();
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = HistoryStore::new(&path);
        assert!(store.load_history().is_empty());
        store.save_prediction("admin", "x.mp4", 50.0, "r").unwrap();
        assert_eq!(store.load_history().len(), 1);
    }

    #[test]
    fn test_concurrent_saves_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));

        let handles: Vec<_> = (0..16)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .save_prediction(&format!("farmer{}", t), &format!("{}.mp4", i), 60.0, "r")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = store.load_history();
        assert_eq!(records.len(), 160);
        for t in 0..16 {
            assert_eq!(store.user_history(&format!("farmer{}", t)).len(), 10);
        }
    }

    #[test]
    fn test_stats() {
        let now = NaiveDateTime::parse_from_str("2024-05-31T12:00:00", TIMESTAMP_PARSE_FORMAT).unwrap();
        let records = vec![
            record("a", "2024-05-30T08:00:00.000000", 85.0),
            record("a", "2024-05-20T08:00:00", 60.0),
            record("a", "2024-03-01T08:00:00.5", 95.0),
            record("a", "garbage", 40.0),
        ];
        let stats = HistoryStats::from_records(&records, 80.0, now);
        assert_eq!(stats.total_predictions, 4);
        assert_eq!(stats.average_fertility, Some(70.0));
        assert_eq!(stats.high_fertility_count, 2);
        assert_eq!(stats.last_7_days, 1);
        assert_eq!(stats.last_30_days, 2);
        // 无法解析的时间戳只影响按天统计
        let valid = HistoryStats::from_records(&records[..3], 80.0, now);
        assert_eq!(valid.last_analysis.as_deref(), Some("2024-05-30T08:00:00.000000"));
        assert_eq!(valid.last_band, Some(FertilityBand::classify(85.0)));

        let empty = HistoryStats::from_records(&[], 80.0, now);
        assert_eq!(empty.average_fertility, None);
        assert_eq!(empty.last_analysis, None);
        assert_eq!(empty.last_band, None);
    }
}
