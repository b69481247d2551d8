//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 命中率统计
//!
//! 按月累计命中与未命中次数，只做观测，不影响任何读写决策。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::StorageError;
use crate::keys::{hit_key, miss_key};
use crate::storage::RemoteStore;

/// 命中率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRatio {
    pub hit_count: i64,
    pub miss_count: i64,
    pub ratio: f64,
}

impl HitRatio {
    pub fn new(hit_count: i64, miss_count: i64) -> Self {
        let total = hit_count + miss_count;
        let ratio = if total <= 0 {
            0.0
        } else {
            hit_count as f64 / total as f64
        };
        Self {
            hit_count,
            miss_count,
            ratio,
        }
    }
}

/// 命中率记录器
#[derive(Clone)]
pub struct HitRatioRecorder {
    store: Arc<dyn RemoteStore>,
}

impl HitRatioRecorder {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// 累加本月计数，失败只记录日志
    pub async fn add_hit_ratio(&self, hit_count: usize, miss_count: usize) {
        let now = Utc::now();
        let hit_key = hit_key(now);
        let miss_key = miss_key(now);
        debug!(
            hit_count,
            miss_count,
            hit_key = %hit_key,
            miss_key = %miss_key,
            "记录命中率"
        );

        for key in [&hit_key, &miss_key] {
            if let Err(e) = self.store.set_nx(key, b"0").await {
                warn!("初始化计数键失败: key={}, error={}", key, e);
            }
        }

        if let Err(e) = self.store.incr_by(&hit_key, hit_count as i64).await {
            error!("累加命中次数失败: {}", e);
            return;
        }
        if let Err(e) = self.store.incr_by(&miss_key, miss_count as i64).await {
            error!("累加未命中次数失败: {}", e);
        }
    }

    /// 本月命中率
    pub async fn current_hit_ratio(&self) -> Result<HitRatio, StorageError> {
        let now = Utc::now();
        let hit = self.read_counter(&hit_key(now)).await?;
        let miss = self.read_counter(&miss_key(now)).await?;
        Ok(HitRatio::new(hit, miss))
    }

    async fn read_counter(&self, key: &str) -> Result<i64, StorageError> {
        let raw = self.store.get(key).await?;
        Ok(raw
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or_else(|| {
                debug!("计数键不存在或不可解析: {}", key);
                0
            }))
    }
}

impl std::fmt::Debug for HitRatioRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitRatioRecorder").finish_non_exhaustive()
    }
}
