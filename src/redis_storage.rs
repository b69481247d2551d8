//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Redis客户端封装
//!
//! 基于Redis实现远端存储接口，供多个进程共享同一份缓存。
//!
//! # 特性
//!
//! - **连接管理**: 使用ConnectionManager管理连接，断线自动重连
//! - **快速失败**: 命令不做重试，错误直接返回给调用方
//! - **管道写入**: 带过期时间的批量写入通过单个管道提交
//! - **超时控制**: 建连与每条命令都有独立的超时

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, FromRedisValue, IntoConnectionInfo};
use secrecy::{ExposeSecret, Secret};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::StorageError;
use crate::storage::{KeyTtl, RemoteStore};

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 读写超时
    pub io_timeout: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout", &self.connection_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connection_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置密码（使用 Secret）
    pub fn password_secret(mut self, password: Secret<String>) -> Self {
        self.password = Some(password);
        self
    }

    /// 设置连接超时
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置IO超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 生成连接信息，密码与数据库索引以配置为准
    fn connection_info(&self) -> Result<redis::ConnectionInfo, StorageError> {
        let mut info = self.url.as_str().into_connection_info().map_err(|e| {
            error!("解析Redis URL失败: {}", e);
            StorageError::ConnectionError(format!("解析Redis URL失败: {}", e))
        })?;
        info.redis.db = self.db;
        if let Some(password) = &self.password {
            info.redis.password = Some(password.expose_secret().clone());
        }
        Ok(info)
    }
}

/// Redis存储实现
#[derive(Clone)]
pub struct RedisStore {
    /// 连接管理器
    conn: ConnectionManager,
    /// 配置
    config: RedisConfig,
}

impl RedisStore {
    /// 创建新的Redis存储
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        info!("创建Redis存储, URL: {}", config.url);

        let client = Client::open(config.connection_info()?).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e))
        })?;

        let conn = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                error!("连接Redis超时: {:?}", config.connection_timeout);
                StorageError::TimeoutError(format!("连接Redis超时: {:?}", config.connection_timeout))
            })?
            .map_err(|e| {
                error!("创建Redis连接管理器失败: {}", e);
                StorageError::ConnectionError(format!("创建Redis连接管理器失败: {}", e))
            })?;

        info!("Redis存储创建成功");
        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// 检查Redis连接
    pub async fn ping(&self) -> Result<(), StorageError> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    /// 执行单条命令
    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, StorageError> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.config.io_timeout, cmd.query_async::<_, T>(&mut conn)).await {
            Ok(result) => result.map_err(|e| {
                error!("Redis命令失败: {}", e);
                StorageError::from(e)
            }),
            Err(_) => Err(StorageError::TimeoutError(format!(
                "Redis命令超时: {:?}",
                self.config.io_timeout
            ))),
        }
    }

    /// 执行管道
    async fn query_pipe(&self, pipe: &redis::Pipeline) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.config.io_timeout, pipe.query_async::<_, ()>(&mut conn)).await {
            Ok(result) => result.map_err(|e| {
                error!("Redis管道失败: {}", e);
                StorageError::from(e)
            }),
            Err(_) => Err(StorageError::TimeoutError(format!(
                "Redis管道超时: {:?}",
                self.config.io_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// PTTL 的返回值：-2 表示键不存在，-1 表示永不过期
fn key_ttl(millis: i64) -> KeyTtl {
    match millis {
        -2 => KeyTtl::Missing,
        m if m < 0 => KeyTtl::Persistent,
        m => KeyTtl::Expires(Duration::from_millis(m as u64)),
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // 单个键时 MGET 仍返回数组
        self.query(redis::cmd("MGET").arg(keys)).await
    }

    async fn mset(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        debug!("Redis写入 {} 个键, ttl={:?}", entries.len(), ttl);
        match ttl {
            None => {
                let mut cmd = redis::cmd("MSET");
                for (key, value) in entries {
                    cmd.arg(key).arg(value.as_slice());
                }
                self.query::<()>(&cmd).await
            }
            Some(ttl) => {
                let millis = ttl_millis(ttl);
                let mut pipe = redis::pipe();
                for (key, value) in entries {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value.as_slice())
                        .arg("PX")
                        .arg(millis)
                        .ignore();
                }
                self.query_pipe(&pipe).await
            }
        }
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await
    }

    async fn pttl(&self, key: &str) -> Result<KeyTtl, StorageError> {
        let millis: i64 = self.query(redis::cmd("PTTL").arg(key)).await?;
        Ok(key_ttl(millis))
    }

    async fn persist(&self, key: &str) -> Result<bool, StorageError> {
        self.query(redis::cmd("PERSIST").arg(key)).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StorageError> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("SADD").arg(key).arg(members)).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
        self.query(redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn spop(&self, key: &str, count: usize) -> Result<Vec<String>, StorageError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("SPOP").arg(key).arg(count)).await
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, StorageError> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        self.query(redis::cmd("LPUSH").arg(key).arg(values)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn llen(&self, key: &str) -> Result<u64, StorageError> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        self.query(redis::cmd("LTRIM").arg(key).arg(start).arg(stop))
            .await
    }

    async fn set_nx(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        self.query(redis::cmd("SETNX").arg(key).arg(value)).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StorageError> {
        self.query(redis::cmd("INCRBY").arg(key).arg(delta)).await
    }
}
