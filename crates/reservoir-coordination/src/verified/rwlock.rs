//! Pure read-write lock computations.
//!
//! # Tiger Style
//!
//! - Uses explicit types (u64 for timestamps, u32 for counts)
//! - Time is passed explicitly (no calls to system time)
//! - Deterministic behavior for testing

use crate::rwlock::RWLockMode;

/// RWLock key prefix.
pub const RWLOCK_PREFIX: &str = "__rwlock:";

/// Generate the key for a RWLock.
///
/// # Example
///
/// ```ignore
/// assert_eq!(rwlock_key("my-lock"), "__rwlock:my-lock");
/// ```
#[inline]
pub fn rwlock_key(name: &str) -> String {
    format!("{}{}", RWLOCK_PREFIX, name)
}

/// Compute the lock deadline from current time and lease.
///
/// Uses saturating_add to prevent overflow.
#[inline]
pub fn compute_lock_deadline(now_ms: u64, lease_ms: u64) -> u64 {
    now_ms.saturating_add(lease_ms)
}

/// Check if a reader entry has expired.
///
/// A deadline of 0 means released.
#[inline]
pub fn is_reader_expired(deadline_ms: u64, now_ms: u64) -> bool {
    deadline_ms == 0 || now_ms > deadline_ms
}

/// Check if a writer entry has expired.
///
/// A deadline of 0 means released.
#[inline]
pub fn is_writer_expired(deadline_ms: u64, now_ms: u64) -> bool {
    deadline_ms == 0 || now_ms > deadline_ms
}

/// Check if a read lock can be acquired.
///
/// Readers are compatible with each other; only an active writer blocks them.
#[inline]
pub fn can_acquire_read(mode: RWLockMode, writer_expired: bool) -> bool {
    !(mode == RWLockMode::Write && !writer_expired)
}

/// Check if a write lock can be acquired.
///
/// Requires no active readers and no active writer.
#[inline]
pub fn can_acquire_write(mode: RWLockMode, active_readers: u32, writer_expired: bool) -> bool {
    if active_readers > 0 {
        return false;
    }
    !(mode == RWLockMode::Write && !writer_expired)
}

/// Compute the next fencing token for a write lock acquisition.
#[inline]
pub fn compute_next_write_token(current_token: u64) -> u64 {
    current_token.saturating_add(1)
}

/// Determine the lock mode after expired holders are dropped.
#[inline]
pub fn compute_mode_after_cleanup(current_mode: RWLockMode, active_readers: u32, writer_active: bool) -> RWLockMode {
    match current_mode {
        RWLockMode::Write if writer_active => RWLockMode::Write,
        RWLockMode::Write => RWLockMode::Free,
        RWLockMode::Read if active_readers > 0 => RWLockMode::Read,
        RWLockMode::Read => RWLockMode::Free,
        RWLockMode::Free => RWLockMode::Free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rwlock_key() {
        assert_eq!(rwlock_key("my-lock"), "__rwlock:my-lock");
        assert_eq!(rwlock_key(""), "__rwlock:");
    }

    #[test]
    fn test_compute_lock_deadline() {
        assert_eq!(compute_lock_deadline(1000, 5000), 6000);
        assert_eq!(compute_lock_deadline(u64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_expiry() {
        assert!(is_reader_expired(0, 10));
        assert!(is_reader_expired(500, 1000));
        assert!(!is_reader_expired(1000, 1000));
        assert!(is_writer_expired(0, 10));
        assert!(!is_writer_expired(2000, 1000));
    }

    #[test]
    fn test_can_acquire_read() {
        assert!(can_acquire_read(RWLockMode::Free, true));
        assert!(can_acquire_read(RWLockMode::Read, true));
        assert!(!can_acquire_read(RWLockMode::Write, false));
        assert!(can_acquire_read(RWLockMode::Write, true));
    }

    #[test]
    fn test_can_acquire_write() {
        assert!(can_acquire_write(RWLockMode::Free, 0, true));
        assert!(!can_acquire_write(RWLockMode::Read, 2, true));
        assert!(can_acquire_write(RWLockMode::Read, 0, true));
        assert!(!can_acquire_write(RWLockMode::Write, 0, false));
        assert!(can_acquire_write(RWLockMode::Write, 0, true));
    }

    #[test]
    fn test_compute_next_write_token() {
        assert_eq!(compute_next_write_token(0), 1);
        assert_eq!(compute_next_write_token(41), 42);
        assert_eq!(compute_next_write_token(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_compute_mode_after_cleanup() {
        assert_eq!(compute_mode_after_cleanup(RWLockMode::Write, 0, true), RWLockMode::Write);
        assert_eq!(compute_mode_after_cleanup(RWLockMode::Write, 0, false), RWLockMode::Free);
        assert_eq!(compute_mode_after_cleanup(RWLockMode::Read, 3, false), RWLockMode::Read);
        assert_eq!(compute_mode_after_cleanup(RWLockMode::Read, 0, false), RWLockMode::Free);
        assert_eq!(compute_mode_after_cleanup(RWLockMode::Free, 0, false), RWLockMode::Free);
    }
}
