//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存引擎
//!
//! 旁路缓存的批量读取、关联索引维护以及两次删除的级联失效。
//!
//! # 特性
//!
//! - **批量读取**: 一次MGET区分命中与未命中，只把未命中的ID交给数据源
//! - **分段查询**: 未命中的ID按固定大小分段查询，限制单次请求规模
//! - **顺序保持**: 结果按调用方给出的ID顺序返回，不存在的ID直接缺席
//! - **异步写回**: 响应产生之后再写缓存，写回失败只记录日志
//! - **级联失效**: 通过关联索引递归清理引用了被清理对象的缓存条目
//! - **两次删除**: 固定延迟后再删一次，清除并发读取写回的旧值

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{DEFAULT_CLEAN_DELAY_MS, DEFAULT_EXPIRE_SECS, DEFAULT_SEGMENT_SIZE};
use crate::datasource::{Condition, DataSourceRegistry, EncodedObject, SharedDataSource};
use crate::entity::{Object, RelatedEntity};
use crate::error::{CacheError, Result, StorageError};
use crate::keys::{entry_key, key_list, related_key};
use crate::statistics::HitRatioRecorder;
use crate::storage::{KeyTtl, RemoteStore};

/// 写缓存时使用的过期策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// 引擎默认过期时间
    #[default]
    Default,
    /// 指定过期时间
    After(Duration),
    /// 永不过期
    Infinite,
}

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 默认过期时间
    pub default_expire: Duration,
    /// 数据源分段查询大小
    pub segment_size: usize,
    /// 两次删除之间的延迟
    pub clean_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_expire: Duration::from_secs(DEFAULT_EXPIRE_SECS),
            segment_size: DEFAULT_SEGMENT_SIZE,
            clean_delay: Duration::from_millis(DEFAULT_CLEAN_DELAY_MS),
        }
    }
}

/// 缓存查询结果
#[derive(Debug)]
pub(crate) struct CacheLookup<T> {
    /// 命中的对象，按请求ID索引
    pub hits: HashMap<String, T>,
    /// 命中的ID，保持请求顺序
    pub hit_ids: Vec<String>,
    /// 未命中的ID，保持请求顺序且去重
    pub missing_ids: Vec<String>,
}

/// 缓存引擎
#[derive(Clone)]
pub struct CacheEngine {
    /// 远端存储
    store: Arc<dyn RemoteStore>,
    /// 数据源注册表
    registry: Arc<DataSourceRegistry>,
    /// 配置
    settings: Arc<parking_lot::RwLock<EngineSettings>>,
    /// 命中率记录器
    hit_ratio: HitRatioRecorder,
}

impl CacheEngine {
    /// 创建新的缓存引擎
    pub fn new(store: Arc<dyn RemoteStore>, registry: Arc<DataSourceRegistry>) -> Self {
        Self::with_settings(store, registry, EngineSettings::default())
    }

    /// 使用配置创建缓存引擎
    pub fn with_settings(
        store: Arc<dyn RemoteStore>,
        registry: Arc<DataSourceRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let hit_ratio = HitRatioRecorder::new(Arc::clone(&store));
        Self {
            store,
            registry,
            settings: Arc::new(parking_lot::RwLock::new(settings)),
            hit_ratio,
        }
    }

    /// 设置默认过期时间
    pub fn set_default_expire(&self, duration: Duration) {
        self.settings.write().default_expire = duration;
    }

    /// 当前配置
    pub fn settings(&self) -> EngineSettings {
        self.settings.read().clone()
    }

    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn hit_ratio(&self) -> &HitRatioRecorder {
        &self.hit_ratio
    }

    /// 批量读取
    ///
    /// 命中的对象直接返回，未命中的从数据源分段查询，结果按 `ids` 顺序排列。
    /// 新查询到的对象在返回之后异步写回缓存。
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn batch_get<T: Object>(
        &self,
        data_source: &str,
        ids: &[String],
        expiry: Expiry,
    ) -> Result<Vec<T>> {
        let source = self.registry.get::<T>(data_source)?;
        self.batch_get_from(&source, ids, expiry).await
    }

    /// 直接使用调用方持有的数据源批量读取，不经过注册表
    pub async fn batch_get_from<T: Object>(
        &self,
        source: &SharedDataSource<T>,
        ids: &[String],
        expiry: Expiry,
    ) -> Result<Vec<T>> {
        let lookup = self.query_for_cache(source, ids).await?;
        self.record_hit_ratio(lookup.hit_ids.len(), lookup.missing_ids.len());
        log_lookup(ids, &lookup.missing_ids);

        let fetched = self.fetch_segmented(source, &lookup.missing_ids).await?;
        let result = reorder(ids, lookup.hits, fetched.iter().cloned());

        if !fetched.is_empty() {
            let engine = self.clone();
            let name = source.name().to_string();
            tokio::spawn(async move {
                if let Err(e) = engine.save_cache(&name, &fetched, expiry).await {
                    error!("写回缓存失败: data_source={}, error={}", name, e);
                }
            });
        }

        Ok(result)
    }

    /// 按条件查询
    ///
    /// 由数据源解析条件得到ID，再走批量读取。
    #[instrument(skip(self, condition))]
    pub async fn query<T: Object>(
        &self,
        data_source: &str,
        condition: &Condition,
        expiry: Expiry,
    ) -> Result<Vec<T>> {
        let source = self.registry.get::<T>(data_source)?;
        self.query_from(&source, condition, expiry).await
    }

    pub async fn query_from<T: Object>(
        &self,
        source: &SharedDataSource<T>,
        condition: &Condition,
        expiry: Expiry,
    ) -> Result<Vec<T>> {
        let ids = resolve_condition(source, condition).await?;
        self.batch_get_from(source, &ids, expiry).await
    }

    /// 两次删除失效
    ///
    /// 立即返回；后台任务先删一次（含级联），等待固定延迟后再删一次。
    pub fn clean(&self, data_source: &str, ids: &[String]) -> JoinHandle<()> {
        let engine = self.clone();
        let name = data_source.to_string();
        let ids = ids.to_vec();
        let delay = self.settings.read().clean_delay;

        tokio::spawn(async move {
            if let Err(e) = engine.clean_now(&name, &ids).await {
                error!("第一次删除失败: data_source={}, ids={:?}, error={}", name, ids, e);
            }
            tokio::time::sleep(delay).await;
            if let Err(e) = engine.clean_now(&name, &ids).await {
                error!("第二次删除失败: data_source={}, ids={:?}, error={}", name, ids, e);
            }
        })
    }

    /// 执行一次级联删除
    ///
    /// 删除条目，读取关联索引并把其中声明的对象加入待删队列，最后删除索引本身。
    /// 每个 (数据源, ID) 在一次删除中最多处理一次。
    pub async fn clean_now(&self, data_source: &str, ids: &[String]) -> Result<()> {
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut pending: VecDeque<(String, Vec<String>)> = VecDeque::new();
        pending.push_back((data_source.to_string(), ids.to_vec()));

        while let Some((name, ids)) = pending.pop_front() {
            let ids: Vec<String> = ids
                .into_iter()
                .filter(|id| visited.insert((name.clone(), id.clone())))
                .collect();
            if ids.is_empty() {
                continue;
            }

            self.store.del(&key_list(&name, &ids, entry_key)).await?;

            let related_keys = key_list(&name, &ids, related_key);
            for key in &related_keys {
                for member in self.store.smembers(key).await? {
                    match serde_json::from_str::<RelatedEntity>(&member) {
                        Ok(related) => {
                            pending.push_back((related.data_source_name, related.related_ids))
                        }
                        Err(e) => warn!("跳过无法解析的关联成员: key={}, member={}, error={}", key, member, e),
                    }
                }
            }
            self.store.del(&related_keys).await?;
            debug!("已删除 {} 的 {} 个条目", name, ids.len());
        }

        info!("级联删除完成: data_source={}, 共处理 {} 个条目", data_source, visited.len());
        Ok(())
    }

    /// 查询缓存，区分命中与未命中
    pub(crate) async fn query_for_cache<T: Object>(
        &self,
        source: &SharedDataSource<T>,
        ids: &[String],
    ) -> Result<CacheLookup<T>> {
        let ids = dedup(ids);
        let mut lookup = CacheLookup {
            hits: HashMap::with_capacity(ids.len()),
            hit_ids: Vec::with_capacity(ids.len()),
            missing_ids: Vec::new(),
        };
        if ids.is_empty() {
            return Ok(lookup);
        }

        let keys = key_list(source.name(), &ids, entry_key);
        let values = self.store.mget(&keys).await.map_err(|e| {
            error!("读取缓存失败: {}", e);
            e
        })?;

        for ((id, key), value) in ids.into_iter().zip(keys).zip(values) {
            match value {
                Some(bytes) => {
                    let object = source.unmarshal(&bytes).map_err(|e| {
                        error!("缓存条目解码失败: key={}, error={}", key, e);
                        CacheError::MalformedCachedEntry {
                            key: key.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    lookup.hit_ids.push(id.clone());
                    lookup.hits.insert(id, object);
                }
                None => lookup.missing_ids.push(id),
            }
        }
        Ok(lookup)
    }

    /// 分段从数据源查询
    ///
    /// 任一段失败即返回该段的错误。
    pub(crate) async fn fetch_segmented<T: Object>(
        &self,
        source: &SharedDataSource<T>,
        ids: &[String],
    ) -> Result<Vec<T>> {
        let segment_size = self.settings.read().segment_size.max(1);
        let mut objects = Vec::with_capacity(ids.len());
        for segment in ids.chunks(segment_size) {
            let fetched = source.query_by_ids(segment).await.map_err(|e| {
                error!(
                    "数据源查询失败: data_source={}, segment={}, error={}",
                    source.name(),
                    segment.len(),
                    e
                );
                e
            })?;
            objects.extend(fetched);
        }
        Ok(objects)
    }

    /// 序列化并写入缓存
    pub async fn save_cache<T: Object>(
        &self,
        data_source: &str,
        objects: &[T],
        expiry: Expiry,
    ) -> Result<()> {
        let encoded: Vec<EncodedObject> = objects
            .iter()
            .filter_map(|object| match EncodedObject::encode(object) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    error!("序列化对象失败: id={}, error={}", object.string_id(), e);
                    None
                }
            })
            .collect();
        self.save_encoded(data_source, &encoded, expiry).await
    }

    /// 写入已编码的对象及其关联索引
    pub async fn save_encoded(
        &self,
        data_source: &str,
        objects: &[EncodedObject],
        expiry: Expiry,
    ) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let ttl = self.resolve_ttl(expiry);

        let entries: Vec<(String, Vec<u8>)> = objects
            .iter()
            .map(|object| (entry_key(data_source, &object.id), object.bytes.clone()))
            .collect();
        self.store.mset(&entries, ttl).await?;

        self.save_related_ids(data_source, objects, ttl).await?;
        debug!("写回缓存: data_source={}, count={}", data_source, objects.len());
        Ok(())
    }

    /// 维护关联索引
    ///
    /// 对每个声明 (目标数据源, 关联ID)，把声明方登记到目标的关联集合中。
    /// 集合的存活时间只延长不缩短：永不过期的写入让集合永不过期，
    /// 带过期时间的写入只在剩余时间更短时才更新。
    async fn save_related_ids(
        &self,
        data_source: &str,
        objects: &[EncodedObject],
        ttl: Option<Duration>,
    ) -> std::result::Result<(), StorageError> {
        let index = build_related_index(data_source, objects);
        for (key, members) in index {
            let members: Vec<String> = members.into_iter().collect();
            let current = self.store.pttl(&key).await?;
            self.store.sadd(&key, &members).await?;
            match (ttl, current) {
                (None, KeyTtl::Expires(_)) => {
                    self.store.persist(&key).await?;
                }
                (Some(ttl), KeyTtl::Missing) => {
                    self.store.expire(&key, ttl).await?;
                }
                (Some(ttl), KeyTtl::Expires(remaining)) if remaining < ttl => {
                    self.store.expire(&key, ttl).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn resolve_ttl(&self, expiry: Expiry) -> Option<Duration> {
        match expiry {
            Expiry::Default => Some(self.settings.read().default_expire),
            Expiry::After(duration) if duration.is_zero() => Some(self.settings.read().default_expire),
            Expiry::After(duration) => Some(duration),
            Expiry::Infinite => None,
        }
    }

    pub(crate) fn record_hit_ratio(&self, hit: usize, missing: usize) {
        let recorder = self.hit_ratio.clone();
        tokio::spawn(async move {
            recorder.add_hit_ratio(hit, missing).await;
        });
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("registry", &self.registry)
            .field("settings", &*self.settings.read())
            .finish_non_exhaustive()
    }
}

/// 关联索引：键为目标的关联集合键，值为声明方成员（JSON编码的 RelatedEntity）
fn build_related_index(
    data_source: &str,
    objects: &[EncodedObject],
) -> HashMap<String, HashSet<String>> {
    let mut index: HashMap<String, HashSet<String>> = HashMap::new();
    for object in objects {
        let owner = RelatedEntity::new(data_source, [object.id.clone()]);
        let member = match serde_json::to_string(&owner) {
            Ok(member) => member,
            Err(e) => {
                error!("编码关联成员失败: id={}, error={}", object.id, e);
                continue;
            }
        };
        for related in &object.related {
            for related_id in &related.related_ids {
                index
                    .entry(related_key(&related.data_source_name, related_id))
                    .or_default()
                    .insert(member.clone());
            }
        }
    }
    index
}

/// 由支持条件查询的数据源解析出ID
pub(crate) async fn resolve_condition<T: Object>(
    source: &SharedDataSource<T>,
    condition: &Condition,
) -> Result<Vec<String>> {
    let conditional = source.as_conditional().ok_or_else(|| {
        error!("数据源不支持条件查询: {}", source.name());
        CacheError::UnsupportedCondition(source.name().to_string())
    })?;
    let ids = conditional.query_ids_by_condition(condition).await?;
    debug!("条件查询得到 {} 个ID", ids.len());
    Ok(ids)
}

/// 去重并保持首次出现的顺序
pub(crate) fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// 按请求顺序重排，每个ID至多出现一次，不存在的ID缺席
pub(crate) fn reorder<T, I>(ids: &[String], hits: HashMap<String, T>, fetched: I) -> Vec<T>
where
    T: Object,
    I: IntoIterator<Item = T>,
{
    let mut objects = hits;
    for object in fetched {
        objects.insert(object.string_id(), object);
    }
    ids.iter().filter_map(|id| objects.remove(id)).collect()
}

pub(crate) fn log_lookup(ids: &[String], missing_ids: &[String]) {
    if missing_ids.is_empty() {
        debug!("全部命中缓存");
    } else if missing_ids.len() == ids.len() {
        debug!(ids = ?ids, "全部未命中缓存");
    } else {
        debug!(missing_ids = ?missing_ids, ids = ?ids, "部分命中缓存");
    }
}
