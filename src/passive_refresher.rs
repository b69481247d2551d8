//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 被动刷新器
//!
//! 在引擎读路径上叠加软过期：命中的条目如果没有软过期元数据或元数据已过期，
//! 同步回源刷新；刷新结果与旧值比较得到反馈位，再由过期计算器算出下一次软过期时长。
//!
//! 条目本身以永不过期写入，何时陈旧完全由软过期元数据决定。

use ahash::AHashMap as HashMap;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{
    DEFAULT_UPDATE_MAX_FREQUENCY_SECS, DEFAULT_UPDATE_MIN_FREQUENCY_SECS, FEEDBACK_RECORD_SIZE,
    FEEDBACK_TRIM_FACTOR, KLC_GLOBAL_FEEDBACK_KEY,
};
use crate::datasource::{Condition, SharedDataSource};
use crate::engine::{dedup, log_lookup, reorder, resolve_condition, CacheEngine, Expiry};
use crate::entity::{CacheExpire, Feedback, FeedbackEntry, FeedbackRecordEntry, Object};
use crate::error::{CacheError, Result};
use crate::expire_calculator::ExpireCalculator;
use crate::keys::{group_feedback_key, id_expire_key, id_feedback_key, key_list};

/// 软过期时长的上下限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateFrequency {
    pub min: Duration,
    pub max: Duration,
}

impl Default for UpdateFrequency {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(DEFAULT_UPDATE_MIN_FREQUENCY_SECS),
            max: Duration::from_secs(DEFAULT_UPDATE_MAX_FREQUENCY_SECS),
        }
    }
}

impl UpdateFrequency {
    /// 构造上下限，顺序颠倒时自动交换
    pub fn new(max: Duration, min: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    /// 把计算结果限制在上下限之内
    pub fn limit(&self, expire: Duration) -> Duration {
        if expire > self.max {
            self.max
        } else if expire < self.min {
            self.min
        } else {
            expire
        }
    }
}

/// 软过期的命中条目
#[derive(Debug, Clone)]
struct StaleObject<T> {
    previous: T,
    metadata: Option<CacheExpire>,
}

/// 被动刷新器
#[derive(Clone)]
pub struct PassiveRefresher {
    engine: CacheEngine,
    calculator: Arc<dyn ExpireCalculator>,
    frequency: Arc<RwLock<UpdateFrequency>>,
    enabled: Arc<AtomicBool>,
}

impl PassiveRefresher {
    pub fn new(engine: CacheEngine, calculator: Arc<dyn ExpireCalculator>) -> Self {
        Self {
            engine,
            calculator,
            frequency: Arc::new(RwLock::new(UpdateFrequency::default())),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 设置软过期时长的上下限
    pub fn set_update_frequency(&self, max_frequency: Duration, min_frequency: Duration) {
        let frequency = UpdateFrequency::new(max_frequency, min_frequency);
        info!(
            "更新软过期上下限: min={:?}, max={:?}",
            frequency.min, frequency.max
        );
        *self.frequency.write() = frequency;
    }

    pub fn update_frequency(&self) -> UpdateFrequency {
        *self.frequency.read()
    }

    /// 开关缓存，关闭时读请求直接回源
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!("被动刷新缓存已{}", if enabled { "启用" } else { "关闭" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    /// 批量读取
    ///
    /// 与引擎的批量读取相同，另外把软过期的命中条目当作未命中同步回源。
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn batch_get<T: Object>(&self, data_source: &str, ids: &[String]) -> Result<Vec<T>> {
        let source = self.engine.registry().get::<T>(data_source)?;
        self.batch_get_from(&source, ids).await
    }

    /// 直接使用调用方持有的数据源批量读取
    pub async fn batch_get_from<T: Object>(
        &self,
        source: &SharedDataSource<T>,
        ids: &[String],
    ) -> Result<Vec<T>> {
        let data_source = source.name();
        if !self.is_enabled() {
            debug!("缓存已关闭，直接回源");
            let fetched = self.engine.fetch_segmented(source, &dedup(ids)).await?;
            return Ok(reorder(ids, HashMap::new(), fetched));
        }

        let mut lookup = self.engine.query_for_cache(source, ids).await?;
        let metadata = self.fetch_expire_metadata(data_source, &lookup.hit_ids).await?;

        let now = Utc::now();
        let mut stale: HashMap<String, StaleObject<T>> = HashMap::new();
        for id in &lookup.hit_ids {
            let current = metadata.get(id);
            if current.map(|m| !m.is_expired_at(now)).unwrap_or(false) {
                continue;
            }
            if let Some(previous) = lookup.hits.remove(id) {
                stale.insert(
                    id.clone(),
                    StaleObject {
                        previous,
                        metadata: current.cloned(),
                    },
                );
                lookup.missing_ids.push(id.clone());
            }
        }
        if !stale.is_empty() {
            debug!(expired = stale.len(), "软过期条目需要回源");
        }

        let hit_count = lookup.hit_ids.len() - stale.len();
        self.engine.record_hit_ratio(hit_count, lookup.missing_ids.len());
        log_lookup(ids, &lookup.missing_ids);

        let fetched = self
            .engine
            .fetch_segmented(source, &lookup.missing_ids)
            .await?;
        let result = reorder(ids, lookup.hits, fetched.iter().cloned());

        if !fetched.is_empty() {
            let refresher = self.clone();
            let name = data_source.to_string();
            tokio::spawn(async move {
                if let Err(e) = refresher.save_cache(&name, fetched, stale).await {
                    error!("保存刷新结果失败: data_source={}, error={}", name, e);
                }
            });
        }

        Ok(result)
    }

    /// 按条件查询
    pub async fn query<T: Object>(&self, data_source: &str, condition: &Condition) -> Result<Vec<T>> {
        let source: SharedDataSource<T> = self.engine.registry().get::<T>(data_source)?;
        let ids = resolve_condition(&source, condition).await?;
        self.batch_get_from(&source, &ids).await
    }

    /// 读取软过期元数据，按ID索引
    async fn fetch_expire_metadata(
        &self,
        data_source: &str,
        ids: &[String],
    ) -> Result<HashMap<String, CacheExpire>> {
        let mut metadata = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(metadata);
        }
        let keys = key_list(data_source, ids, id_expire_key);
        let values = self.engine.store().mget(&keys).await?;
        for ((id, key), value) in ids.iter().zip(keys).zip(values) {
            let Some(bytes) = value else {
                continue;
            };
            let expire: CacheExpire = serde_json::from_slice(&bytes).map_err(|e| {
                error!("软过期元数据解码失败: key={}, error={}", key, e);
                CacheError::MalformedCachedEntry {
                    key: key.clone(),
                    reason: e.to_string(),
                }
            })?;
            metadata.insert(id.clone(), expire);
        }
        Ok(metadata)
    }

    /// 计算反馈并保存刷新结果
    async fn save_cache<T: Object>(
        &self,
        data_source: &str,
        fetched: Vec<T>,
        stale: HashMap<String, StaleObject<T>>,
    ) -> Result<()> {
        let entries = self.build_feedback(data_source, &fetched, &stale).await?;
        let frequency = self.update_frequency();

        let records: Vec<FeedbackRecordEntry> = entries
            .iter()
            .map(|entry| FeedbackRecordEntry {
                id: entry.id.clone(),
                data_source_name: entry.data_source_name.clone(),
                current_feedback: entry.current_feedback,
                expire_time: frequency.limit(self.calculator.calculate(entry)),
            })
            .collect();

        self.engine
            .save_cache(data_source, &fetched, Expiry::Infinite)
            .await?;
        self.save_feedback(data_source, &records).await
    }

    /// 组装反馈条目
    async fn build_feedback<T: Object>(
        &self,
        data_source: &str,
        fetched: &[T],
        stale: &HashMap<String, StaleObject<T>>,
    ) -> Result<Vec<FeedbackEntry>> {
        let global_feedback = self.read_history(KLC_GLOBAL_FEEDBACK_KEY).await?;
        let group_feedback = self.read_history(&group_feedback_key(data_source)).await?;
        let default_expire = self.engine.settings().default_expire;
        let now = Utc::now();

        let mut entries = Vec::with_capacity(fetched.len());
        for object in fetched {
            let id = object.string_id();
            let mut entry = FeedbackEntry {
                id: id.clone(),
                data_source_name: data_source.to_string(),
                current_feedback: Feedback::Changed,
                recent_feedback: Vec::new(),
                global_feedback: global_feedback.clone(),
                group_feedback: group_feedback.clone(),
                expire_time: Duration::ZERO,
            };

            if let Some(stale) = stale.get(&id) {
                entry.recent_feedback = self.read_history(&id_feedback_key(data_source, &id)).await?;
                entry.expire_time = stale
                    .metadata
                    .as_ref()
                    .map(|m| m.expire_duration)
                    .unwrap_or(default_expire);

                if stale.previous == *object {
                    entry.current_feedback = Feedback::Unchanged;
                    // 未变化时把陈旧的那段时间也计入上一次时长
                    if let Some(metadata) = &stale.metadata {
                        let overdue = (now - metadata.expire_at).to_std().unwrap_or(Duration::ZERO);
                        entry.expire_time = entry.expire_time.saturating_add(overdue);
                    }
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// 读取最近的反馈历史
    async fn read_history(&self, key: &str) -> Result<Vec<Feedback>> {
        let raw = self
            .engine
            .store()
            .lrange(key, 0, FEEDBACK_RECORD_SIZE as i64 - 1)
            .await?;
        Ok(raw
            .iter()
            .filter_map(|value| {
                let parsed = Feedback::parse(value);
                if parsed.is_none() {
                    warn!("跳过无法解析的反馈: key={}, value={}", key, value);
                }
                parsed
            })
            .collect())
    }

    /// 追加反馈历史并写入软过期元数据
    async fn save_feedback(&self, data_source: &str, records: &[FeedbackRecordEntry]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let store = self.engine.store();
        let bits: Vec<String> = records
            .iter()
            .map(|record| record.current_feedback.as_bit().to_string())
            .collect();

        let group_key = group_feedback_key(data_source);
        store.lpush(KLC_GLOBAL_FEEDBACK_KEY, &bits).await?;
        store.lpush(&group_key, &bits).await?;

        let mut trim_keys = vec![KLC_GLOBAL_FEEDBACK_KEY.to_string(), group_key];
        for (record, bit) in records.iter().zip(&bits) {
            let key = id_feedback_key(&record.data_source_name, &record.id);
            store.lpush(&key, std::slice::from_ref(bit)).await?;
            trim_keys.push(key);
        }

        let expires: Vec<(String, Vec<u8>)> = records
            .iter()
            .filter_map(|record| {
                let expire = CacheExpire::starting_now(record.id.clone(), record.expire_time);
                match serde_json::to_vec(&expire) {
                    Ok(bytes) => Some((id_expire_key(&record.data_source_name, &record.id), bytes)),
                    Err(e) => {
                        error!("序列化软过期元数据失败: id={}, error={}", record.id, e);
                        None
                    }
                }
            })
            .collect();
        store.mset(&expires, None).await?;

        self.trim_history(&trim_keys).await;
        debug!("保存 {} 条反馈记录", records.len());
        Ok(())
    }

    /// 历史长度超过上限的若干倍时截回上限
    async fn trim_history(&self, keys: &[String]) {
        let store = self.engine.store();
        let threshold = (FEEDBACK_RECORD_SIZE * FEEDBACK_TRIM_FACTOR) as u64;
        for key in keys {
            match store.llen(key).await {
                Ok(len) if len > threshold => {
                    if let Err(e) = store.ltrim(key, 0, FEEDBACK_RECORD_SIZE as i64 - 1).await {
                        error!("截断反馈历史失败: key={}, error={}", key, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("读取反馈历史长度失败: key={}, error={}", key, e);
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for PassiveRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassiveRefresher")
            .field("engine", &self.engine)
            .field("frequency", &*self.frequency.read())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
