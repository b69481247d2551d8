//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 主动刷新器
//!
//! 后台周期任务：每个周期从共享刷新队列弹出一批 `数据源-ID`，按数据源分组回源，
//! 以默认过期时间写回缓存，再把同一批键放回队列等待下一个周期。

use ahash::AHashSet as HashSet;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_REFRESH_SIZE, KLC_REFRESH_KEY};
use crate::engine::{CacheEngine, Expiry};
use crate::entity::Object;
use crate::error::{Result, StorageError};
use crate::keys::{parse_refresh_member, refresh_member};

/// 主动刷新配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// 每个周期弹出的键数量
    pub refresh_size: usize,
    /// 周期间隔
    pub refresh_interval: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_size: DEFAULT_REFRESH_SIZE,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }
}

/// 主动刷新器
#[derive(Clone)]
pub struct ActiveRefresher {
    engine: CacheEngine,
    settings: Arc<RwLock<RefreshSettings>>,
    running: Arc<AtomicBool>,
    /// 每次启动或停止都会递增，后台任务发现代数变化后退出
    generation: Arc<AtomicU64>,
    /// 同一时刻只允许一个刷新周期
    tick_lock: Arc<tokio::sync::Mutex<()>>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ActiveRefresher {
    pub fn new(engine: CacheEngine) -> Self {
        Self::with_settings(engine, RefreshSettings::default())
    }

    pub fn with_settings(engine: CacheEngine, settings: RefreshSettings) -> Self {
        Self {
            engine,
            settings: Arc::new(RwLock::new(settings)),
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            tick_lock: Arc::new(tokio::sync::Mutex::new(())),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_refresh_size(&self, refresh_size: usize) {
        self.settings.write().refresh_size = refresh_size;
    }

    /// 修改间隔，从下一次等待开始生效
    pub fn set_refresh_interval(&self, refresh_interval: Duration) {
        self.settings.write().refresh_interval = refresh_interval;
    }

    pub fn settings(&self) -> RefreshSettings {
        *self.settings.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 批量读取，条目永不过期；`refresh` 为真时把ID加入刷新队列
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn batch_get<T: Object>(
        &self,
        data_source: &str,
        ids: &[String],
        refresh: bool,
    ) -> Result<Vec<T>> {
        let objects = self
            .engine
            .batch_get(data_source, ids, Expiry::Infinite)
            .await?;
        if refresh {
            if let Err(e) = self.enqueue(data_source, ids).await {
                error!("加入刷新队列失败: data_source={}, error={}", data_source, e);
            }
        }
        Ok(objects)
    }

    /// 启动后台刷新任务，已在运行时不做任何事
    ///
    /// 停止后立即重新启动时，旧任务在下一次醒来时退出，不会与新任务交替刷新。
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("主动刷新器已在运行");
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("启动主动刷新器: generation={}, {:?}", generation, self.settings());

        let refresher = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let interval = refresher.settings().refresh_interval;
                tokio::time::sleep(interval).await;
                let _tick = refresher.tick_lock.lock().await;
                if !refresher.is_current(generation) {
                    break;
                }
                refresher.do_refresh().await;
            }
            debug!("主动刷新任务退出: generation={}", generation);
        });

        let mut handles = self.handles.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    /// 停止后续周期，正在执行的周期会完整跑完
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.generation.fetch_add(1, Ordering::SeqCst);
            info!("停止主动刷新器");
        }
    }

    /// 等待所有已启动的后台任务退出
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("主动刷新任务异常退出: {}", e);
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    /// 执行一个刷新周期，返回成功刷新的键数量
    pub async fn do_refresh(&self) -> usize {
        let groups = match self.dequeue().await {
            Ok(groups) => groups,
            Err(e) => {
                error!("弹出刷新队列失败: {}", e);
                return 0;
            }
        };

        let mut refreshed = 0;
        for (data_source, ids) in groups {
            let source = match self.engine.registry().get_erased(&data_source) {
                Ok(source) => source,
                Err(e) => {
                    error!("丢弃未知数据源的刷新键: {}, ids={:?}", e, ids);
                    continue;
                }
            };

            match source.fetch_encoded(&ids).await {
                Ok(objects) => {
                    if let Err(e) = self
                        .engine
                        .save_encoded(&data_source, &objects, Expiry::Default)
                        .await
                    {
                        error!("刷新写回失败: data_source={}, error={}", data_source, e);
                    } else {
                        refreshed += ids.len();
                    }
                }
                Err(e) => {
                    error!(
                        "刷新回源失败: data_source={}, ids={:?}, error={}",
                        data_source, ids, e
                    );
                }
            }

            if let Err(e) = self.enqueue(&data_source, &ids).await {
                error!("重新加入刷新队列失败: data_source={}, error={}", data_source, e);
            }
        }
        debug!("本周期刷新 {} 个键", refreshed);
        refreshed
    }

    /// 加入刷新队列
    pub async fn enqueue(&self, data_source: &str, ids: &[String]) -> std::result::Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let members: Vec<String> = ids
            .iter()
            .map(|id| refresh_member(data_source, id))
            .collect();
        self.engine.store().sadd(KLC_REFRESH_KEY, &members).await?;
        Ok(())
    }

    /// 弹出一批刷新键，按数据源分组
    async fn dequeue(&self) -> std::result::Result<BTreeMap<String, Vec<String>>, StorageError> {
        let size = self.settings().refresh_size;
        let members = self.engine.store().spop(KLC_REFRESH_KEY, size).await?;

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut seen = HashSet::with_capacity(members.len());
        for member in &members {
            if !seen.insert(member.as_str()) {
                continue;
            }
            match parse_refresh_member(member) {
                Some((data_source, id)) => groups
                    .entry(data_source.to_string())
                    .or_default()
                    .push(id.to_string()),
                None => warn!("丢弃格式错误的刷新键: {}", member),
            }
        }
        Ok(groups)
    }
}

impl std::fmt::Debug for ActiveRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRefresher")
            .field("settings", &self.settings())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
