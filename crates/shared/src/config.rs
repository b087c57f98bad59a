//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 规则集目录（JSON），为空时引擎以空目录启动
    pub catalog_path: Option<PathBuf>,
    /// 操作/事实元数据文件（构建期提取产物）
    pub metadata_path: Option<PathBuf>,
    /// 初始事实值文件（JSON 对象：事实名 -> 值）
    pub facts_path: Option<PathBuf>,
    /// 是否监听上述文件并热更新
    pub watch_files: bool,
    /// 文件监听 debounce 窗口
    pub watch_debounce_ms: u64,
    /// 保留的执行事件上限，None 表示不限制
    pub history_limit: Option<usize>,
    /// 同一调度轮次内是否并行评估多个规则集
    pub parallel_evaluation: bool,
    /// 事实变更通知 channel 容量
    pub fact_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            metadata_path: None,
            facts_path: None,
            watch_files: true,
            watch_debounce_ms: 200,
            history_limit: None,
            parallel_evaluation: false,
            fact_channel_capacity: 1024,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// 是否输出 JSON 结构化日志
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（RULES_ 前缀，双下划线分隔层级，如 RULES_ENGINE__HISTORY_LIMIT -> engine.history_limit）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(service_name, config_dir)
    }

    /// 从指定目录加载配置，其余规则与 [`AppConfig::load`] 相同
    pub fn load_from(service_name: &str, config_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("RULES_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix("RULES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 文件监听 debounce 窗口
    pub fn watch_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.engine.watch_debounce_ms)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
