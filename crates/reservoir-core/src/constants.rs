//! Fixed limits and default timings.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

// ============================================================================
// Key-Value Size Limits
// ============================================================================

/// Maximum size of a single key in bytes (1 KB).
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum size of a single value in bytes (64 KB).
///
/// Lock state is the largest value written; it is bounded by
/// `MAX_RWLOCK_READERS` entries.
pub const MAX_VALUE_SIZE: u32 = 64 * 1024;

/// Maximum number of keys in a DeleteMulti operation.
pub const MAX_DELETE_MULTI_KEYS: u32 = 100;

// ============================================================================
// Coordination Limits
// ============================================================================

/// Maximum concurrent readers on a single read-write lock.
pub const MAX_RWLOCK_READERS: u32 = 256;

/// Maximum number of resource ids touched by one operation.
pub const MAX_BATCH_RESOURCES: u32 = 64;

/// Attempts made to force-set a counter before giving up.
///
/// Failing this many times means the counter holds a corrupt (negative)
/// value or the substrate is unavailable.
pub const MAX_FORCE_SET_ATTEMPTS: u32 = 10;

/// Interval between polls while waiting on a counter or lock (50 ms).
pub const COORDINATION_POLL_INTERVAL_MS: u64 = 50;

// ============================================================================
// Default Timings
// ============================================================================

/// How long a cache acquire waits for permits (300 ms).
pub const DEFAULT_COUNTER_WAIT_MS: u64 = 300;

/// How long to wait for a per-resource read lock (300 ms).
pub const DEFAULT_READ_LOCK_WAIT_MS: u64 = 300;

/// How long to wait for a per-resource write lock during reinitialization (1 s).
pub const DEFAULT_WRITE_LOCK_WAIT_MS: u64 = 1000;

/// Lease bounding how long any lock may be held (60 s).
pub const DEFAULT_LOCK_LEASE_MS: u64 = 60_000;

// ============================================================================
// Auto-Adjust
// ============================================================================

/// Default auto-adjust rate (out of `MAX_AUTO_ADJUST_RATE`).
pub const DEFAULT_AUTO_ADJUST_RATE: u8 = 3;

/// Upper bound of the auto-adjust rate; a rate equal to this always adjusts.
pub const MAX_AUTO_ADJUST_RATE: u8 = 10;
