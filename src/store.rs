use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::StoreError;

/// 同一存储文件的写锁；克隆出的 store 共享同一把锁
#[derive(Debug, Clone, Default)]
pub struct StoreLock(Arc<Mutex<()>>);

impl StoreLock {
    /// 持锁期间完成 "读取-修改-写回"；锁中毒时继续使用，文件本身始终完整
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 读取 JSON 文件；不存在或损坏时返回默认值
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let Ok(content) = std::fs::read_to_string(path) else {
        return T::default();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("{}损坏，按空处理: {}: {}", what, path.display(), e);
        T::default()
    })
}

/// 原子写入：先写同目录的临时文件，再 rename 覆盖目标
///
/// 读者只会看到旧文件或完整的新文件。
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();

        let back: Vec<i32> = read_json_or_default(&path, "测试文件");
        assert_eq!(back, vec![4]);
        // 临时文件不残留
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_missing_and_corrupt_read_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let missing: BTreeMap<String, i32> = read_json_or_default(&path, "测试文件");
        assert!(missing.is_empty());

        std::fs::write(&path, "[1, 2").unwrap();
        let corrupt: Vec<i32> = read_json_or_default(&path, "测试文件");
        assert!(corrupt.is_empty());
    }

    #[test]
    fn test_lock_is_shared_between_clones() {
        let lock = StoreLock::default();
        let other = lock.clone();
        let guard = lock.acquire();
        assert!(other.0.try_lock().is_err());
        drop(guard);
        assert!(other.0.try_lock().is_ok());
    }
}
