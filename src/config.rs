//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LEXIO__*` 覆盖（双下划线表示嵌套，如 `LEXIO__TIMEOUTS__STREAM_MS=0`）。
//! 超时以毫秒配置：省略取默认值，显式写 0 表示不限制。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::orchestrator::{EngineOptions, DEFAULT_MAX_MESSAGE_CHARS};
use crate::core::timeout::{
    TimeoutPolicy, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRIEVE_AND_GENERATE_TIMEOUT,
    DEFAULT_STREAM_TIMEOUT,
};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub timeouts: TimeoutsSection,
    pub limits: LimitsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [timeouts] 段（毫秒，0 = 不限制）
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    /// 生成、检索、内容加载
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    /// 检索 + 生成
    #[serde(default = "default_retrieve_and_generate_ms")]
    pub retrieve_and_generate_ms: u64,
    /// 相邻两段流式内容的最大间隔
    #[serde(default = "default_stream_ms")]
    pub stream_ms: u64,
}

fn default_request_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_retrieve_and_generate_ms() -> u64 {
    DEFAULT_RETRIEVE_AND_GENERATE_TIMEOUT.as_millis() as u64
}

fn default_stream_ms() -> u64 {
    DEFAULT_STREAM_TIMEOUT.as_millis() as u64
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            retrieve_and_generate_ms: default_retrieve_and_generate_ms(),
            stream_ms: default_stream_ms(),
        }
    }
}

/// [limits] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_max_message_chars() -> usize {
    DEFAULT_MAX_MESSAGE_CHARS
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
        }
    }
}

fn millis_or_unlimited(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl AppConfig {
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            request: millis_or_unlimited(self.timeouts.request_ms),
            retrieve_and_generate: millis_or_unlimited(self.timeouts.retrieve_and_generate_ms),
            stream: millis_or_unlimited(self.timeouts.stream_ms),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            timeouts: self.timeout_policy(),
            max_message_chars: self.limits.max_message_chars,
        }
    }
}

/// 从 config 目录加载配置，环境变量 LEXIO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LEXIO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LEXIO")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
