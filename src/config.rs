//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 配置模块
//!
//! 定义缓存层的配置结构，支持YAML、TOML、JSON三种格式。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::active_refresher::{ActiveRefresher, RefreshSettings};
use crate::constants::{
    DEFAULT_CLEAN_DELAY_MS, DEFAULT_EXPIRE_SECS, DEFAULT_REFRESH_INTERVAL_SECS,
    DEFAULT_REFRESH_SIZE, DEFAULT_SEGMENT_SIZE, DEFAULT_UPDATE_MAX_FREQUENCY_SECS,
    DEFAULT_UPDATE_MIN_FREQUENCY_SECS,
};
use crate::datasource::DataSourceRegistry;
use crate::engine::{CacheEngine, EngineSettings};
use crate::error::{CacheError, Result};
use crate::expire_calculator::CalculatorKind;
use crate::passive_refresher::PassiveRefresher;
use crate::storage::RemoteStore;

/// 缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存，关闭时被动刷新器直接回源
    pub enabled: bool,
    /// 默认过期时间（秒）
    pub default_expire_secs: u64,
    /// 数据源分段查询大小
    pub segment_size: usize,
    /// 两次删除之间的延迟（毫秒）
    pub clean_delay_ms: u64,
    /// 过期时间计算器
    pub calculator: CalculatorKind,
    /// 被动刷新配置
    pub passive: PassiveConfig,
    /// 主动刷新配置
    pub active: ActiveConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_expire_secs: DEFAULT_EXPIRE_SECS,
            segment_size: DEFAULT_SEGMENT_SIZE,
            clean_delay_ms: DEFAULT_CLEAN_DELAY_MS,
            calculator: CalculatorKind::default(),
            passive: PassiveConfig::default(),
            active: ActiveConfig::default(),
        }
    }
}

/// 被动刷新配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassiveConfig {
    pub min_update_frequency_secs: u64,
    pub max_update_frequency_secs: u64,
}

impl Default for PassiveConfig {
    fn default() -> Self {
        Self {
            min_update_frequency_secs: DEFAULT_UPDATE_MIN_FREQUENCY_SECS,
            max_update_frequency_secs: DEFAULT_UPDATE_MAX_FREQUENCY_SECS,
        }
    }
}

/// 主动刷新配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveConfig {
    pub refresh_size: usize,
    pub refresh_interval_secs: u64,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            refresh_size: DEFAULT_REFRESH_SIZE,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置是否启用缓存
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 设置默认过期时间
    pub fn default_expire(mut self, expire: Duration) -> Self {
        self.default_expire_secs = expire.as_secs();
        self
    }

    /// 设置分段大小
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// 设置两次删除的间隔
    pub fn clean_delay(mut self, delay: Duration) -> Self {
        self.clean_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 设置过期时间计算器
    pub fn calculator(mut self, calculator: CalculatorKind) -> Self {
        self.calculator = calculator;
        self
    }

    /// 设置软过期上下限
    pub fn update_frequency(mut self, min: Duration, max: Duration) -> Self {
        self.passive.min_update_frequency_secs = min.as_secs();
        self.passive.max_update_frequency_secs = max.as_secs();
        self
    }

    /// 设置主动刷新批量与间隔
    pub fn refresh(mut self, size: usize, interval: Duration) -> Self {
        self.active.refresh_size = size;
        self.active.refresh_interval_secs = interval.as_secs();
        self
    }

    /// 校验配置
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.default_expire_secs == 0 {
            return Err("默认过期时间必须大于0".to_string());
        }
        if self.segment_size == 0 {
            return Err("分段大小必须大于0".to_string());
        }
        self.passive.validate()?;
        self.active.validate()?;
        Ok(())
    }

    /// 解析YAML配置
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content)
            .map_err(|e| CacheError::ConfigError(format!("YAML解析错误: {}", e)))?;
        config.checked()
    }

    /// 解析TOML配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CacheConfig = toml::from_str(content)
            .map_err(|e| CacheError::ConfigError(format!("TOML解析错误: {}", e)))?;
        config.checked()
    }

    /// 解析JSON配置
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(content)
            .map_err(|e| CacheError::ConfigError(format!("JSON解析错误: {}", e)))?;
        config.checked()
    }

    /// 从文件加载配置，按扩展名选择格式
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| CacheError::ConfigError("无法确定配置文件类型".to_string()))?;

        let config = match extension {
            "yaml" | "yml" => Self::from_yaml_str(&content)?,
            "toml" => Self::from_toml_str(&content)?,
            "json" => Self::from_json_str(&content)?,
            _ => {
                return Err(CacheError::ConfigError(format!(
                    "不支持的配置文件类型: {}",
                    extension
                )))
            }
        };
        info!("加载缓存配置: {}", path.display());
        Ok(config)
    }

    fn checked(self) -> Result<Self> {
        self.validate().map_err(CacheError::ConfigError)?;
        Ok(self)
    }

    /// 引擎配置
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_expire: Duration::from_secs(self.default_expire_secs),
            segment_size: self.segment_size,
            clean_delay: Duration::from_millis(self.clean_delay_ms),
        }
    }

    /// 主动刷新配置
    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            refresh_size: self.active.refresh_size,
            refresh_interval: Duration::from_secs(self.active.refresh_interval_secs),
        }
    }

    /// 构造缓存引擎
    pub fn build_engine(
        &self,
        store: Arc<dyn RemoteStore>,
        registry: Arc<DataSourceRegistry>,
    ) -> CacheEngine {
        CacheEngine::with_settings(store, registry, self.engine_settings())
    }

    /// 构造被动刷新器
    pub fn build_passive_refresher(&self, engine: CacheEngine) -> PassiveRefresher {
        let refresher = PassiveRefresher::new(engine, self.calculator.build());
        refresher.set_update_frequency(
            Duration::from_secs(self.passive.max_update_frequency_secs),
            Duration::from_secs(self.passive.min_update_frequency_secs),
        );
        refresher.set_enabled(self.enabled);
        refresher
    }

    /// 构造主动刷新器（未启动）
    pub fn build_active_refresher(&self, engine: CacheEngine) -> ActiveRefresher {
        ActiveRefresher::with_settings(engine, self.refresh_settings())
    }
}

impl PassiveConfig {
    /// 校验被动刷新配置
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_update_frequency_secs == 0 {
            return Err("软过期下限必须大于0".to_string());
        }
        if self.min_update_frequency_secs > self.max_update_frequency_secs {
            return Err(format!(
                "软过期下限 {} 大于上限 {}",
                self.min_update_frequency_secs, self.max_update_frequency_secs
            ));
        }
        Ok(())
    }
}

impl ActiveConfig {
    /// 校验主动刷新配置
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.refresh_size == 0 {
            return Err("刷新批量必须大于0".to_string());
        }
        if self.refresh_interval_secs == 0 {
            return Err("刷新间隔必须大于0".to_string());
        }
        Ok(())
    }
}
