//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized key layout and policy constants for klcache.
//!
//! The key prefixes are shared with every other process that reads or writes
//! the same remote store, so they must stay bit-exact.

// ============================================================================
// Remote Store Key Layout
// ============================================================================

/// Prefix of cached entries: `klc:cache:entry:{dataSource}:{id}`.
pub const KLC_ENTRY_PREFIX: &str = "klc:cache:entry:";

/// Prefix of related-index sets: `klc:cache:related:{dataSource}:{id}`.
pub const KLC_RELATED_PREFIX: &str = "klc:cache:related:";

/// Process-wide feedback history list.
pub const KLC_GLOBAL_FEEDBACK_KEY: &str = "klc:cache:expirecalculator:global";

/// Prefix of per-data-source feedback history lists.
pub const KLC_GROUP_FEEDBACK_PREFIX: &str = "klc:cache:expirecalculator:group:";

/// Prefix of per-id feedback history lists.
pub const KLC_ID_FEEDBACK_PREFIX: &str = "klc:cache:expirecalculator:id:";

/// Prefix of soft-expiration metadata.
pub const KLC_ID_EXPIRE_PREFIX: &str = "klc:cache:expire:id:";

/// Shared active-refresh queue (a set).
pub const KLC_REFRESH_KEY: &str = "klc:cache:refresh";

/// Separator between data source name and id inside the refresh queue.
pub const KLC_ID_SEPARATOR: &str = "-";

/// Prefix of monthly hit counters: `klc:cache:statistics:hit:{YYYYMM}`.
pub const KLC_HIT_CACHE_PREFIX: &str = "klc:cache:statistics:hit:";

/// Prefix of monthly miss counters: `klc:cache:statistics:miss:{YYYYMM}`.
pub const KLC_MISS_CACHE_PREFIX: &str = "klc:cache:statistics:miss:";

// ============================================================================
// Cache Engine Constants
// ============================================================================

/// Default entry expiration (10 minutes).
///
/// Applied when a caller asks for [`Expiry::Default`](crate::engine::Expiry::Default).
pub const DEFAULT_EXPIRE_SECS: u64 = 600;

/// Maximum number of ids sent to a data source in one `query_by_ids` call.
pub const DEFAULT_SEGMENT_SIZE: usize = 800;

/// Delay between the two passes of a double delete (5 seconds).
pub const DEFAULT_CLEAN_DELAY_MS: u64 = 5_000;

// ============================================================================
// Adaptive Expiration Constants
// ============================================================================

/// Number of feedback bits kept per rolling history.
pub const FEEDBACK_RECORD_SIZE: usize = 20;

/// A history list is trimmed back to [`FEEDBACK_RECORD_SIZE`] once it grows
/// beyond this multiple of it.
pub const FEEDBACK_TRIM_FACTOR: usize = 10;

/// TTL returned by every calculator for an id without history (10 seconds).
pub const DEFAULT_FIRST_EXPIRE_SECS: u64 = 10;

/// Upper bound of a passively computed TTL (30 minutes).
pub const DEFAULT_UPDATE_MAX_FREQUENCY_SECS: u64 = 1_800;

/// Lower bound of a passively computed TTL (15 seconds).
pub const DEFAULT_UPDATE_MIN_FREQUENCY_SECS: u64 = 15;

/// Magnitude clamp applied to the derivative signal `Dn`.
pub const MAX_DERIVATIVE: i32 = 2;

// ============================================================================
// Active Refresher Constants
// ============================================================================

/// Keys popped from the refresh queue per tick.
pub const DEFAULT_REFRESH_SIZE: usize = 10;

/// Interval between two active refresh ticks (30 seconds).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;
