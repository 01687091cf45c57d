//! Pure permit counter computations.
//!
//! Counters are stored as decimal `i64` strings. A well-formed counter is
//! never negative; the force-set guard refuses to overwrite a negative value
//! so that corruption is surfaced instead of silently papered over.

/// Parse a stored counter value.
///
/// Returns `None` for values that are not a decimal integer.
#[inline]
pub fn parse_permits(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Check whether `permits` can be taken from `current`.
#[inline]
pub fn can_acquire_permits(current: i64, permits: u32) -> bool {
    current >= i64::from(permits)
}

/// Counter value after taking `permits`.
///
/// Callers check [`can_acquire_permits`] first; the subtraction saturates.
#[inline]
pub fn compute_after_acquire(current: i64, permits: u32) -> i64 {
    current.saturating_sub(i64::from(permits))
}

/// Counter value after returning `permits`.
#[inline]
pub fn compute_after_release(current: i64, permits: u32) -> i64 {
    current.saturating_add(i64::from(permits))
}

/// Whether a forced set may overwrite the current value.
///
/// Allowed when the counter is absent or non-negative.
#[inline]
pub fn can_force_set(current: Option<i64>) -> bool {
    current.is_none_or(|value| value >= 0)
}

/// Recover the resource id from a counter key (`{prefix}:{resource_id}`).
///
/// Prefixes never contain `:`; the id may. Keys without a separator are
/// returned unchanged.
#[inline]
pub fn resource_id_from_counter_key(key: &str) -> &str {
    match key.split_once(':') {
        Some((_, resource_id)) => resource_id,
        None => key,
    }
}
