//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 日志初始化
//!
//! 基于 tracing-subscriber 安装全局订阅者。`RUST_LOG` 存在时优先使用，
//! 否则使用配置中的日志级别。
//!
//! # 示例
//!
//! ```rust,no_run
//! use klcache::telemetry::{init_tracing, TelemetryConfig};
//!
//! init_tracing(&TelemetryConfig::new("klcache").log_level("klcache=debug")).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{CacheError, Result};

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// 服务名称
    pub service_name: String,
    /// 日志过滤指令，例如 `info` 或 `klcache=debug`
    pub log_level: String,
    /// 是否输出 target
    pub with_target: bool,
    /// 是否输出ANSI颜色
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "klcache".to_string(),
            log_level: "info".to_string(),
            with_target: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// 创建新的配置
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.log_level).map_err(|e| {
                CacheError::ConfigError(format!("无效的日志级别 {}: {}", self.log_level, e))
            }),
        }
    }
}

/// 安装全局日志订阅者，只能成功一次
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter = config.env_filter()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .map_err(|e| CacheError::ConfigError(format!("初始化日志失败: {}", e)))?;

    info!("日志初始化完成: service={}", config.service_name);
    Ok(())
}
