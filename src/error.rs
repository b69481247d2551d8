//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。

use thiserror::Error;

/// klcache 错误类型
#[derive(Error, Debug)]
pub enum CacheError {
    /// 数据源未注册
    #[error("未知数据源: {0}")]
    UnknownDataSource(String),

    /// 数据源不支持条件查询
    #[error("数据源不支持条件查询: {0}")]
    UnsupportedCondition(String),

    /// 数据源注册的对象类型与调用方请求的类型不一致
    #[error("数据源对象类型不匹配: {0}")]
    DataSourceTypeMismatch(String),

    /// 缓存值无法解码
    #[error("缓存条目格式错误: key={key}, reason={reason}")]
    MalformedCachedEntry { key: String, reason: String },

    /// 数据源查询错误
    #[error("数据源错误: {0}")]
    DataSourceError(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    StorageError(#[from] StorageError),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// 存储错误
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),

    /// 未找到
    #[error("未找到: {0}")]
    NotFound(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StorageError::ConnectionError(err.to_string())
        } else if err.is_timeout() {
            StorageError::TimeoutError(err.to_string())
        } else {
            StorageError::QueryError(err.to_string())
        }
    }
}

/// klcache 结果类型
pub type Result<T> = std::result::Result<T, CacheError>;
