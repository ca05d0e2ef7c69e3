use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::simulation::SimulationConfig;

/// 应用配置（模拟覆盖、存储路径、仪表盘阈值、日志级别）
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 低生育力模拟配置
    pub simulation: SimulationConfig,
    /// 预测历史文件
    pub history_file: PathBuf,
    /// 用户文件
    pub users_file: PathBuf,
    /// HTTP 本地分析只允许读取该目录下的视频
    pub media_dir: PathBuf,
    /// 统计中“高生育力”的阈值
    pub fertility_threshold: f64,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            history_file: PathBuf::from("history.json"),
            users_file: PathBuf::from("users.json"),
            media_dir: PathBuf::from("media"),
            fertility_threshold: 80.0,
            log_level: "info".to_string(),
        }
    }
}

/// 模拟配置的原始字符串值，尚未解析
#[derive(Debug, Clone, Default)]
pub struct RawSimulation {
    pub enabled: Option<String>,
    pub probability: Option<String>,
    pub nondeterministic: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
}

impl RawSimulation {
    /// 逐项合并：self 优先
    fn or(self, other: RawSimulation) -> RawSimulation {
        RawSimulation {
            enabled: self.enabled.or(other.enabled),
            probability: self.probability.or(other.probability),
            nondeterministic: self.nondeterministic.or(other.nondeterministic),
            min: self.min.or(other.min),
            max: self.max.or(other.max),
        }
    }

    /// 解析为模拟配置；任一数值无法解析时整体回退到默认值
    pub fn resolve(&self) -> SimulationConfig {
        let defaults = SimulationConfig::default();

        let number = |value: &Option<String>, default: f64| -> Option<f64> {
            match value {
                Some(v) => v.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
                None => Some(default),
            }
        };

        let (Some(probability), Some(min), Some(max)) = (
            number(&self.probability, defaults.probability),
            number(&self.min, defaults.min),
            number(&self.max, defaults.max),
        ) else {
            warn!("低生育力模拟配置中存在无法解析的数值，使用默认配置");
            return defaults;
        };

        SimulationConfig {
            enabled: self.enabled.as_deref().map(parse_bool).unwrap_or(defaults.enabled),
            probability,
            nondeterministic: self
                .nondeterministic
                .as_deref()
                .map(parse_bool)
                .unwrap_or(defaults.nondeterministic),
            min,
            max,
        }
        .normalized()
    }
}

/// 布尔字符串：仅 "1"、"true"、"True" 为真
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "True")
}

/// 配置文件中读到的值
#[derive(Debug, Clone, Default)]
struct FileConfig {
    simulation: RawSimulation,
    history_file: Option<String>,
    users_file: Option<String>,
    media_dir: Option<String>,
    fertility_threshold: Option<String>,
    log_level: Option<String>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, cli: RawSimulation) -> Result<AppConfig> {
        Self::load_with_env(config_file, cli, |key| env::var(key).ok())
    }

    /// 与 `load_config` 相同，环境变量由 `lookup` 提供
    pub fn load_with_env(
        config_file: Option<&Path>,
        cli: RawSimulation,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<AppConfig> {
        // 1. 配置文件：显式指定时必须能读取，否则尝试默认位置
        let file_config = match config_file {
            Some(config_path) => Self::load_from_file(config_path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };

        // 2. 环境变量
        let env_simulation = RawSimulation {
            enabled: lookup("LOW_FERTILITY_SIMULATION_ENABLED"),
            probability: lookup("LOW_FERTILITY_PROB"),
            nondeterministic: lookup("LOW_FERTILITY_NONDETERMINISTIC"),
            min: lookup("LOW_FERTILITY_MIN"),
            max: lookup("LOW_FERTILITY_MAX"),
        };

        // 3. 合并
        let simulation = cli.or(env_simulation).or(file_config.simulation).resolve();
        let defaults = AppConfig::default();

        let fertility_threshold = lookup("FERTILITY_THRESHOLD")
            .or(file_config.fertility_threshold)
            .map(|v| {
                v.trim().parse::<f64>().unwrap_or_else(|_| {
                    warn!("无效的 fertility_threshold: {}，使用默认值", v);
                    defaults.fertility_threshold
                })
            })
            .unwrap_or(defaults.fertility_threshold);

        Ok(AppConfig {
            simulation,
            history_file: lookup("FERTILITY_HISTORY_FILE")
                .or(file_config.history_file)
                .map(PathBuf::from)
                .unwrap_or(defaults.history_file),
            users_file: lookup("FERTILITY_USERS_FILE")
                .or(file_config.users_file)
                .map(PathBuf::from)
                .unwrap_or(defaults.users_file),
            media_dir: lookup("FERTILITY_MEDIA_DIR")
                .or(file_config.media_dir)
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
            fertility_threshold,
            log_level: lookup("LOG_LEVEL")
                .or(file_config.log_level)
                .unwrap_or(defaults.log_level),
        })
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<FileConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        let get = |section: &str, key: &str| config_parser.get(section, key).filter(|v| !v.is_empty());

        Ok(FileConfig {
            simulation: RawSimulation {
                enabled: get("simulation", "enabled"),
                probability: get("simulation", "probability"),
                nondeterministic: get("simulation", "nondeterministic"),
                min: get("simulation", "min"),
                max: get("simulation", "max"),
            },
            history_file: get("storage", "history_file"),
            users_file: get("storage", "users_file"),
            media_dir: get("storage", "media_dir"),
            fertility_threshold: get("dashboard", "fertility_threshold"),
            log_level: get("logging", "level"),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<FileConfig> {
        for path in Self::default_locations() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }
        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 当前目录、用户主目录、/etc 依次查找
    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("fertility-monitor.ini"),
            PathBuf::from(".fertility-monitor.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".fertility-monitor.ini"));
        }
        paths.push(PathBuf::from("/etc/fertility-monitor.ini"));
        paths
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let mut config_parser = configparser::ini::Ini::new();
        config_parser.set("simulation", "enabled", Some("false".to_string()));
        config_parser.set("simulation", "probability", Some("0.0".to_string()));
        config_parser.set("simulation", "nondeterministic", Some("false".to_string()));
        config_parser.set("simulation", "min", Some("40".to_string()));
        config_parser.set("simulation", "max", Some("60".to_string()));
        config_parser.set("storage", "history_file", Some("history.json".to_string()));
        config_parser.set("storage", "users_file", Some("users.json".to_string()));
        config_parser.set("storage", "media_dir", Some("media".to_string()));
        config_parser.set("dashboard", "fertility_threshold", Some("80".to_string()));
        config_parser.set("logging", "level", Some("info".to_string()));

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("True"));
        assert!(!parse_bool("TRUE"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn test_resolve_defaults_and_clamping() {
        assert_eq!(RawSimulation::default().resolve(), SimulationConfig::default());

        let raw = RawSimulation {
            enabled: Some("1".to_string()),
            probability: Some("1.7".to_string()),
            min: Some("70".to_string()),
            max: Some("20".to_string()),
            ..RawSimulation::default()
        };
        let cfg = raw.resolve();
        assert!(cfg.enabled);
        assert_eq!(cfg.probability, 1.0);
        assert_eq!(cfg.min, 70.0);
        assert_eq!(cfg.max, 70.0);
    }

    #[test]
    fn test_malformed_number_falls_back() {
        let raw = RawSimulation {
            enabled: Some("true".to_string()),
            probability: Some("lots".to_string()),
            ..RawSimulation::default()
        };
        assert_eq!(raw.resolve(), SimulationConfig::default());
    }

    #[test]
    fn test_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("fm.ini");
        std::fs::write(
            &ini,
            "[simulation]\nenabled = true\nprobability = 0.2\nmin = 10\nmax = 20\n\
             [storage]\nhistory_file = /data/h.json\n\
             [dashboard]\nfertility_threshold = 75\n",
        )
        .unwrap();

        let env = env_of(&[
            ("LOW_FERTILITY_PROB", "0.4"),
            ("LOG_LEVEL", "debug"),
            ("FERTILITY_MEDIA_DIR", "/srv/videos"),
        ]);
        let cli = RawSimulation {
            max: Some("30".to_string()),
            ..RawSimulation::default()
        };
        let cfg = ConfigLoader::load_with_env(Some(&ini), cli, env).unwrap();

        assert!(cfg.simulation.enabled);
        assert_eq!(cfg.simulation.probability, 0.4);
        assert_eq!(cfg.simulation.min, 10.0);
        assert_eq!(cfg.simulation.max, 30.0);
        assert_eq!(cfg.history_file, PathBuf::from("/data/h.json"));
        assert_eq!(cfg.users_file, PathBuf::from("users.json"));
        assert_eq!(cfg.media_dir, PathBuf::from("/srv/videos"));
        assert_eq!(cfg.fertility_threshold, 75.0);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = ConfigLoader::load_with_env(
            Some(Path::new("/nonexistent/fm.ini")),
            RawSimulation::default(),
            env_of(&[]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("fm.ini");
        ConfigLoader::create_default_config(&ini).unwrap();

        let cfg = ConfigLoader::load_with_env(Some(&ini), RawSimulation::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.simulation, SimulationConfig::default());
        assert_eq!(cfg.fertility_threshold, 80.0);
        assert_eq!(cfg.media_dir, PathBuf::from("media"));
        assert_eq!(cfg.log_level, "info");
    }
}
