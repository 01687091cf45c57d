//! Errors returned by key-value store implementations.

use snafu::Snafu;

/// Errors from the key-value capability.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum KeyValueStoreError {
    /// Key does not exist.
    #[snafu(display("key '{key}' not found"))]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The store could not complete the operation.
    #[snafu(display("operation failed: {reason}"))]
    Failed {
        /// Human-readable cause.
        reason: String,
    },

    /// Compare-and-swap precondition did not hold.
    #[snafu(display("compare-and-swap failed for key '{key}': expected {expected:?}, found {actual:?}"))]
    CompareAndSwapFailed {
        /// Key that was compared.
        key: String,
        /// Value the caller expected.
        expected: Option<String>,
        /// Value actually present.
        actual: Option<String>,
    },

    /// Key exceeds `MAX_KEY_SIZE`.
    #[snafu(display("key size {size} exceeds maximum of {max} bytes"))]
    KeyTooLarge {
        /// Actual size.
        size: u32,
        /// Allowed size.
        max: u32,
    },

    /// Value exceeds `MAX_VALUE_SIZE`.
    #[snafu(display("value size {size} exceeds maximum of {max} bytes"))]
    ValueTooLarge {
        /// Actual size.
        size: u32,
        /// Allowed size.
        max: u32,
    },

    /// Too many keys in one batch command.
    #[snafu(display("batch size {size} exceeds maximum of {max} keys"))]
    BatchTooLarge {
        /// Actual size.
        size: u32,
        /// Allowed size.
        max: u32,
    },

    /// Empty keys are rejected.
    #[snafu(display("key cannot be empty"))]
    EmptyKey,
}

impl KeyValueStoreError {
    /// Whether this is a CAS conflict that a retry loop should absorb.
    pub fn is_cas_conflict(&self) -> bool {
        matches!(self, KeyValueStoreError::CompareAndSwapFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_error_not_found_display() {
        let err = KeyValueStoreError::NotFound {
            key: "my-key".to_string(),
        };
        assert_eq!(err.to_string(), "key 'my-key' not found");
    }

    #[test]
    fn kv_error_compare_and_swap_failed_display() {
        let err = KeyValueStoreError::CompareAndSwapFailed {
            key: "counter".to_string(),
            expected: Some("10".to_string()),
            actual: Some("11".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "compare-and-swap failed for key 'counter': expected Some(\"10\"), found Some(\"11\")"
        );
        assert!(err.is_cas_conflict());
    }

    #[test]
    fn kv_error_empty_key_display() {
        let err = KeyValueStoreError::EmptyKey;
        assert_eq!(err.to_string(), "key cannot be empty");
        assert!(!err.is_cas_conflict());
    }

    #[test]
    fn kv_error_key_too_large_display() {
        let err = KeyValueStoreError::KeyTooLarge { size: 2048, max: 1024 };
        assert_eq!(err.to_string(), "key size 2048 exceeds maximum of 1024 bytes");
    }
}
