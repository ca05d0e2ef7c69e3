use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::StoreError;
use crate::store::{read_json_or_default, write_json_atomic, StoreLock};

/// 用户记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// SHA-256 十六进制摘要
    pub password: String,
    pub created_at: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl UserRecord {
    /// 角色为 admin，或用户名就是 admin
    pub fn grants_admin(&self, username: &str) -> bool {
        self.role == "admin" || username == "admin"
    }
}

/// SHA-256 十六进制摘要
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// 扁平 JSON 文件形式的用户表
#[derive(Debug, Clone)]
pub struct UserStore {
    path: PathBuf,
    lock: StoreLock,
}

impl UserStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: StoreLock::default(),
        }
    }

    /// 读取用户表；文件不存在或损坏时返回空表
    pub fn load_users(&self) -> BTreeMap<String, UserRecord> {
        read_json_or_default(&self.path, "用户文件")
    }

    /// 全部用户（按用户名字典序），供管理员查看
    pub fn list_users(&self) -> Vec<(String, UserRecord)> {
        self.load_users().into_iter().collect()
    }

    fn new_record(password: &str, role: &str) -> UserRecord {
        UserRecord {
            password: hash_password(password),
            created_at: Local::now().naive_local().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            role: role.to_string(),
        }
    }

    /// 注册新用户；用户名已存在时返回 false
    pub fn register_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.acquire();
        let mut users = self.load_users();
        if users.contains_key(username) {
            return Ok(false);
        }
        users.insert(username.to_string(), Self::new_record(password, "user"));
        write_json_atomic(&self.path, &users)?;
        info!("已注册用户: {}", username);
        Ok(true)
    }

    pub fn authenticate_user(&self, username: &str, password: &str) -> bool {
        self.load_users()
            .get(username)
            .map(|u| u.password == hash_password(password))
            .unwrap_or(false)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.load_users()
            .get(username)
            .map(|u| u.grants_admin(username))
            .unwrap_or(false)
    }

    /// 用户文件不存在时写入演示账号
    pub fn initialize_demo_users(&self) -> Result<bool, StoreError> {
        let _guard = self.lock.acquire();
        if self.path.exists() {
            return Ok(false);
        }
        let mut users = BTreeMap::new();
        users.insert("farmer1".to_string(), Self::new_record("demo123", "user"));
        users.insert("admin".to_string(), Self::new_record("admin123", "admin"));
        write_json_atomic(&self.path, &users)?;
        info!("已创建演示账号: {}", self.path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_register_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path().join("users.json"));

        assert!(store.register_user("cowboy", "moo").unwrap());
        assert!(!store.register_user("cowboy", "other").unwrap());
        assert!(store.authenticate_user("cowboy", "moo"));
        assert!(!store.authenticate_user("cowboy", "other"));
        assert!(!store.authenticate_user("nobody", "moo"));
        assert!(!store.is_admin("cowboy"));
    }

    #[test]
    fn test_demo_users() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path().join("users.json"));

        assert!(store.initialize_demo_users().unwrap());
        assert!(!store.initialize_demo_users().unwrap());
        assert!(store.authenticate_user("farmer1", "demo123"));
        assert!(store.authenticate_user("admin", "admin123"));
        assert!(store.is_admin("admin"));
        assert!(!store.is_admin("farmer1"));
        let listed = store.list_users();
        let names: Vec<&str> = listed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["admin", "farmer1"]);
        assert_eq!(listed[0].1.role, "admin");
        assert_eq!(listed[1].1.role, "user");
    }

    #[test]
    fn test_concurrent_registrations_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path().join("users.json"));

        let handles: Vec<_> = (0..16)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..5 {
                        assert!(store.register_user(&format!("u{}_{}", t, i), "pw").unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_users().len(), 80);
        assert!(store.authenticate_user("u15_4", "pw"));
    }

    #[test]
    fn test_missing_role_defaults_to_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"admin": {"password": "x", "created_at": "2024-01-01"}, "bob": {"password": "y", "created_at": "2024-01-01"}}"#,
        )
        .unwrap();
        let store = UserStore::new(&path);
        assert_eq!(store.load_users()["bob"].role, "user");
        assert!(store.is_admin("admin"));
        assert!(!store.is_admin("bob"));
    }
}
