//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! klcache - Cache-aside layer with cascading invalidation and adaptive expiration
//!
//! Sits between application code and record-oriented data sources, backed by a
//! remote key-value store with TTL support.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use klcache::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`CacheEngine`] - Batched cache-aside reads, related index and double delete
//! - [`PassiveRefresher`] - Soft expiration driven by feedback history
//! - [`ActiveRefresher`] - Background polling refresh of flagged ids
//! - [`ExpireCalculator`] - Pluggable TTL strategies
//! - [`CacheConfig`] - Configuration and component wiring
//! - [`CacheError`] - Error types
//!
//! ## Storage (feature-gated)
//!
//! - [`MemoryStore`] (requires `memory` feature)
//! - `RedisStore` (requires `redis` feature)
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use klcache::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct User {
//!     id: String,
//!     name: String,
//! }
//!
//! impl Object for User {
//!     fn string_id(&self) -> String {
//!         self.id.clone()
//!     }
//! }
//!
//! struct Users;
//!
//! #[async_trait]
//! impl DataSource for Users {
//!     type Item = User;
//!
//!     fn name(&self) -> &str {
//!         "users"
//!     }
//!
//!     async fn query_by_ids(&self, ids: &[String]) -> klcache::Result<Vec<User>> {
//!         Ok(ids
//!             .iter()
//!             .map(|id| User { id: id.clone(), name: format!("user-{}", id) })
//!             .collect())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(DataSourceRegistry::new());
//!     registry.register(Users);
//!
//!     let config = CacheConfig::default();
//!     let engine = config.build_engine(Arc::new(MemoryStore::new()), registry);
//!
//!     let ids = vec!["2".to_string(), "1".to_string()];
//!     let users: Vec<User> = engine.batch_get("users", &ids, Expiry::Default).await.unwrap();
//!     assert_eq!(users[0].id, "2");
//! }
//! ```
//!
//! # Features
//!
//! - **Partial-hit reconciliation**: only missing ids reach the data source, in bounded segments
//! - **Cascading invalidation**: related index plus a delayed second delete pass
//! - **Adaptive expiration**: four feedback-driven TTL calculators
//! - **Active refresh**: queue-driven polling for explicitly flagged ids

pub mod prelude;

pub mod active_refresher;
pub mod config;
pub mod constants;
pub mod datasource;
pub mod engine;
pub mod entity;
pub mod error;
pub mod expire_calculator;
pub mod keys;
pub mod passive_refresher;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod statistics;
pub mod storage;
#[cfg(feature = "telemetry")]
pub mod telemetry;

// 重新导出常用类型
pub use active_refresher::{ActiveRefresher, RefreshSettings};
pub use config::{ActiveConfig, CacheConfig, PassiveConfig};
pub use datasource::{
    Condition, ConditionalDataSource, DataSource, DataSourceRegistry, EncodedObject,
    ErasedDataSource, SharedDataSource, SortOrder,
};
pub use engine::{CacheEngine, EngineSettings, Expiry};
pub use entity::{
    CacheExpire, Feedback, FeedbackEntry, FeedbackRecordEntry, Object, RelatedEntity,
};
pub use error::{CacheError, Result, StorageError};
pub use expire_calculator::{
    CalculatorKind, DerivativeExpireCalculator, ExpireCalculator,
    IntegrateDerivativeExpireCalculator, ProportionExpireCalculator, SimpleExpireCalculator,
};
pub use passive_refresher::{PassiveRefresher, UpdateFrequency};
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisStore};
pub use statistics::{HitRatio, HitRatioRecorder};
#[cfg(feature = "memory")]
pub use storage::MemoryStore;
pub use storage::{KeyTtl, RemoteStore};
#[cfg(feature = "telemetry")]
pub use telemetry::{init_tracing, TelemetryConfig};
