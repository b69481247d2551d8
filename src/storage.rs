//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 存储抽象层
//!
//! 定义远端键值存储接口和内存实现。接口的语义与Redis命令一一对应，
//! 缓存引擎只依赖这里列出的操作。

use crate::error::StorageError;
use ahash::AHashSet as HashSet;
use async_trait::async_trait;
use std::time::Duration;

/// 键的剩余存活时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// 键不存在
    Missing,
    /// 键存在且永不过期
    Persistent,
    /// 键将在给定时间后过期
    Expires(Duration),
}

/// 远端键值存储接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 获取值
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// 批量获取值，结果与 `keys` 一一对应
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

    /// 批量设置值，`ttl` 为 None 表示永不过期
    async fn mset(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// 删除键，返回实际删除的数量
    async fn del(&self, keys: &[String]) -> Result<u64, StorageError>;

    /// 设置过期时间
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// 剩余存活时间
    async fn pttl(&self, key: &str) -> Result<KeyTtl, StorageError>;

    /// 移除过期时间，返回键原先是否带有过期时间
    async fn persist(&self, key: &str) -> Result<bool, StorageError>;

    /// 向集合添加成员，返回新增数量
    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StorageError>;

    /// 获取集合全部成员
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError>;

    /// 随机弹出最多 `count` 个集合成员
    async fn spop(&self, key: &str, count: usize) -> Result<Vec<String>, StorageError>;

    /// 从列表头部依次压入，返回压入后的长度
    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, StorageError>;

    /// 获取列表区间（闭区间，负数从尾部计数）
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError>;

    /// 列表长度
    async fn llen(&self, key: &str) -> Result<u64, StorageError>;

    /// 只保留列表区间（闭区间，负数从尾部计数）
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError>;

    /// 键不存在时设置
    async fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, StorageError>;

    /// 原子自增
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StorageError>;
}

/// 把Redis风格的闭区间下标换算为实际下标
pub(crate) fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { len + start } else { start }.max(0);
    let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "memory")]
mod memory {
    use super::*;
    use dashmap::mapref::entry::Entry;
    use dashmap::DashMap;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// 存储值
    #[derive(Debug, Clone)]
    enum StoredValue {
        Bytes(Vec<u8>),
        Set(HashSet<String>),
        List(VecDeque<String>),
    }

    /// 存储条目（包含值和过期时间）
    #[derive(Debug, Clone)]
    struct StoredEntry {
        value: StoredValue,
        expires_at: Option<Instant>,
    }

    impl StoredEntry {
        fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
            Self {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            }
        }

        fn is_expired(&self) -> bool {
            self.expires_at
                .map(|at| Instant::now() >= at)
                .unwrap_or(false)
        }
    }

    fn wrong_type(key: &str) -> StorageError {
        StorageError::QueryError(format!(
            "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
            key
        ))
    }

    /// 内存存储实现
    ///
    /// 按需清理过期键，适用于测试和单进程部署。
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        data: DashMap<String, StoredEntry>,
    }

    impl MemoryStore {
        /// 创建新的内存存储
        pub fn new() -> Self {
            Self {
                data: DashMap::new(),
            }
        }

        /// 键是否存在（未过期）
        pub fn contains_key(&self, key: &str) -> bool {
            self.purge(key);
            self.data.contains_key(key)
        }

        /// 剩余存活时间，None 表示键不存在或永不过期
        pub fn ttl(&self, key: &str) -> Option<Duration> {
            self.purge(key);
            self.data
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(Instant::now()))
        }

        /// 未过期键的数量
        pub fn len(&self) -> usize {
            self.data.retain(|_, entry| !entry.is_expired());
            self.data.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// 清空
        pub fn clear(&self) {
            self.data.clear();
        }

        fn purge(&self, key: &str) {
            self.data.remove_if(key, |_, entry| entry.is_expired());
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.purge(key);
            match self.data.get(key) {
                Some(entry) => match &entry.value {
                    StoredValue::Bytes(bytes) => Ok(Some(bytes.clone())),
                    _ => Err(wrong_type(key)),
                },
                None => Ok(None),
            }
        }

        async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
            Ok(keys
                .iter()
                .map(|key| {
                    self.purge(key);
                    self.data.get(key).and_then(|entry| match &entry.value {
                        StoredValue::Bytes(bytes) => Some(bytes.clone()),
                        _ => None,
                    })
                })
                .collect())
        }

        async fn mset(
            &self,
            entries: &[(String, Vec<u8>)],
            ttl: Option<Duration>,
        ) -> Result<(), StorageError> {
            for (key, value) in entries {
                self.data.insert(
                    key.clone(),
                    StoredEntry::new(StoredValue::Bytes(value.clone()), ttl),
                );
            }
            Ok(())
        }

        async fn del(&self, keys: &[String]) -> Result<u64, StorageError> {
            let mut removed = 0;
            for key in keys {
                self.purge(key);
                if self.data.remove(key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
            self.purge(key);
            match self.data.get_mut(key) {
                Some(mut entry) => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn pttl(&self, key: &str) -> Result<KeyTtl, StorageError> {
            self.purge(key);
            Ok(match self.data.get(key) {
                None => KeyTtl::Missing,
                Some(entry) => match entry.expires_at {
                    None => KeyTtl::Persistent,
                    Some(at) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
                },
            })
        }

        async fn persist(&self, key: &str) -> Result<bool, StorageError> {
            self.purge(key);
            match self.data.get_mut(key) {
                Some(mut entry) => Ok(entry.expires_at.take().is_some()),
                None => Ok(false),
            }
        }

        async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StorageError> {
            self.purge(key);
            let mut entry = self
                .data
                .entry(key.to_string())
                .or_insert_with(|| StoredEntry::new(StoredValue::Set(HashSet::new()), None));
            match &mut entry.value {
                StoredValue::Set(set) => Ok(members
                    .iter()
                    .filter(|member| set.insert((*member).clone()))
                    .count() as u64),
                _ => Err(wrong_type(key)),
            }
        }

        async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
            self.purge(key);
            match self.data.get(key) {
                Some(entry) => match &entry.value {
                    StoredValue::Set(set) => Ok(set.iter().cloned().collect()),
                    _ => Err(wrong_type(key)),
                },
                None => Ok(Vec::new()),
            }
        }

        async fn spop(&self, key: &str, count: usize) -> Result<Vec<String>, StorageError> {
            self.purge(key);
            match self.data.entry(key.to_string()) {
                Entry::Occupied(mut occupied) => {
                    let popped = match &mut occupied.get_mut().value {
                        StoredValue::Set(set) => {
                            let popped: Vec<String> = set.iter().take(count).cloned().collect();
                            for member in &popped {
                                set.remove(member);
                            }
                            popped
                        }
                        _ => return Err(wrong_type(key)),
                    };
                    if matches!(&occupied.get().value, StoredValue::Set(set) if set.is_empty()) {
                        occupied.remove();
                    }
                    Ok(popped)
                }
                Entry::Vacant(_) => Ok(Vec::new()),
            }
        }

        async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, StorageError> {
            self.purge(key);
            let mut entry = self
                .data
                .entry(key.to_string())
                .or_insert_with(|| StoredEntry::new(StoredValue::List(VecDeque::new()), None));
            match &mut entry.value {
                StoredValue::List(list) => {
                    for value in values {
                        list.push_front(value.clone());
                    }
                    Ok(list.len() as u64)
                }
                _ => Err(wrong_type(key)),
            }
        }

        async fn lrange(
            &self,
            key: &str,
            start: i64,
            stop: i64,
        ) -> Result<Vec<String>, StorageError> {
            self.purge(key);
            match self.data.get(key) {
                Some(entry) => match &entry.value {
                    StoredValue::List(list) => Ok(normalize_range(list.len(), start, stop)
                        .map(|(from, to)| list.range(from..=to).cloned().collect())
                        .unwrap_or_default()),
                    _ => Err(wrong_type(key)),
                },
                None => Ok(Vec::new()),
            }
        }

        async fn llen(&self, key: &str) -> Result<u64, StorageError> {
            self.purge(key);
            match self.data.get(key) {
                Some(entry) => match &entry.value {
                    StoredValue::List(list) => Ok(list.len() as u64),
                    _ => Err(wrong_type(key)),
                },
                None => Ok(0),
            }
        }

        async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
            self.purge(key);
            match self.data.entry(key.to_string()) {
                Entry::Occupied(mut occupied) => {
                    let now_empty = match &mut occupied.get_mut().value {
                        StoredValue::List(list) => {
                            match normalize_range(list.len(), start, stop) {
                                Some((from, to)) => {
                                    list.truncate(to + 1);
                                    list.drain(..from);
                                }
                                None => list.clear(),
                            }
                            list.is_empty()
                        }
                        _ => return Err(wrong_type(key)),
                    };
                    if now_empty {
                        occupied.remove();
                    }
                    Ok(())
                }
                Entry::Vacant(_) => Ok(()),
            }
        }

        async fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
            self.purge(key);
            match self.data.entry(key.to_string()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(vacant) => {
                    vacant.insert(StoredEntry::new(StoredValue::Bytes(value.to_vec()), None));
                    Ok(true)
                }
            }
        }

        async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
            self.purge(key);
            let mut entry = self
                .data
                .entry(key.to_string())
                .or_insert_with(|| StoredEntry::new(StoredValue::Bytes(b"0".to_vec()), None));
            match &mut entry.value {
                StoredValue::Bytes(bytes) => {
                    let current = std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            StorageError::QueryError(format!(
                                "value is not an integer or out of range: {}",
                                key
                            ))
                        })?;
                    let next = current + delta;
                    *bytes = next.to_string().into_bytes();
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            }
        }
    }
}
