//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from klcache,
//! allowing users to import them with a single `use klcache::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::CacheConfig;
pub use crate::engine::{CacheEngine, Expiry};
pub use crate::error::{CacheError, StorageError};

// Data source contract
pub use crate::datasource::{Condition, ConditionalDataSource, DataSource, DataSourceRegistry};
pub use crate::entity::{Object, RelatedEntity};

// Refreshers
pub use crate::active_refresher::ActiveRefresher;
pub use crate::expire_calculator::{CalculatorKind, ExpireCalculator};
pub use crate::passive_refresher::PassiveRefresher;

pub use crate::storage::RemoteStore;

// Feature-gated exports
#[cfg(feature = "memory")]
pub use crate::storage::MemoryStore;

#[cfg(feature = "redis")]
pub use crate::redis_storage::{RedisConfig, RedisStore};
