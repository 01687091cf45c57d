//! Request and response types for the key-value capability.

use serde::Deserialize;
use serde::Serialize;

use crate::KeyValueStoreError;
use crate::constants::MAX_DELETE_MULTI_KEYS;
use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;

/// Commands for modifying key-value state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a single key-value pair.
    Set { key: String, value: String },
    /// Delete a single key.
    Delete { key: String },
    /// Delete multiple keys atomically.
    DeleteMulti { keys: Vec<String> },
    /// Compare-and-swap: atomically update value if current value matches expected.
    ///
    /// `expected: None` means the key must be absent.
    CompareAndSwap {
        key: String,
        expected: Option<String>,
        new_value: String,
    },
    /// Compare-and-delete: atomically delete key if current value matches expected.
    CompareAndDelete { key: String, expected: String },
}

/// Request to perform a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    /// Create a Set command to store a key-value pair.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a Delete command.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Delete { key: key.into() },
        }
    }

    /// Create a DeleteMulti command.
    pub fn delete_multi(keys: Vec<String>) -> Self {
        Self {
            command: WriteCommand::DeleteMulti { keys },
        }
    }

    /// Create a CompareAndSwap command.
    pub fn compare_and_swap(key: impl Into<String>, expected: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndSwap {
                key: key.into(),
                expected,
                new_value: new_value.into(),
            },
        }
    }

    /// Create a CompareAndDelete command.
    pub fn compare_and_delete(key: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndDelete {
                key: key.into(),
                expected: expected.into(),
            },
        }
    }
}

/// Result of a write operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResult {
    /// Store revision assigned to the write.
    pub revision: u64,
}

/// A value together with its revision metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValueWithRevision {
    pub key: String,
    pub value: String,
    pub create_revision: u64,
    pub mod_revision: u64,
}

/// Request to read a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: String,
}

impl ReadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Response from a read operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    pub kv: Option<KeyValueWithRevision>,
}

impl ReadResult {
    /// The value, if the key exists.
    pub fn value(&self) -> Option<&str> {
        self.kv.as_ref().map(|kv| kv.value.as_str())
    }
}

/// Request to delete a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: String,
}

impl DeleteRequest {
    /// Create a delete request for the specified key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Result of a delete operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub key: String,
    /// Whether the key existed and was removed.
    pub is_deleted: bool,
}

/// Validate a write command against fixed size limits.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    match command {
        WriteCommand::Set { key, value } => {
            check_key(key)?;
            check_value(value)?;
        }
        WriteCommand::Delete { key } => {
            check_key(key)?;
        }
        WriteCommand::DeleteMulti { keys } => {
            if keys.len() > MAX_DELETE_MULTI_KEYS as usize {
                return Err(KeyValueStoreError::BatchTooLarge {
                    size: keys.len() as u32,
                    max: MAX_DELETE_MULTI_KEYS,
                });
            }
            for key in keys {
                check_key(key)?;
            }
        }
        WriteCommand::CompareAndSwap {
            key,
            expected,
            new_value,
        } => {
            check_key(key)?;
            if let Some(expected) = expected {
                check_value(expected)?;
            }
            check_value(new_value)?;
        }
        WriteCommand::CompareAndDelete { key, expected } => {
            check_key(key)?;
            check_value(expected)?;
        }
    }
    Ok(())
}

/// Validate a key used in a read or delete request.
pub fn check_key(key: &str) -> Result<(), KeyValueStoreError> {
    if key.is_empty() {
        return Err(KeyValueStoreError::EmptyKey);
    }
    let len = key.len();
    if len > MAX_KEY_SIZE as usize {
        return Err(KeyValueStoreError::KeyTooLarge {
            size: len as u32,
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn check_value(value: &str) -> Result<(), KeyValueStoreError> {
    let len = value.len();
    if len > MAX_VALUE_SIZE as usize {
        return Err(KeyValueStoreError::ValueTooLarge {
            size: len as u32,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_key() {
        let result = validate_write_command(&WriteRequest::set("", "v").command);
        assert_eq!(result, Err(KeyValueStoreError::EmptyKey));
    }

    #[test]
    fn test_validate_rejects_oversized_key() {
        let key = "k".repeat(MAX_KEY_SIZE as usize + 1);
        let result = validate_write_command(&WriteRequest::delete(key).command);
        assert!(matches!(result, Err(KeyValueStoreError::KeyTooLarge { .. })));
    }

    #[test]
    fn test_validate_rejects_oversized_cas_value() {
        let value = "v".repeat(MAX_VALUE_SIZE as usize + 1);
        let result = validate_write_command(&WriteRequest::compare_and_swap("k", None, value).command);
        assert!(matches!(result, Err(KeyValueStoreError::ValueTooLarge { .. })));
    }

    #[test]
    fn test_validate_rejects_large_delete_multi() {
        let keys = (0..=MAX_DELETE_MULTI_KEYS).map(|i| format!("k{i}")).collect();
        let result = validate_write_command(&WriteRequest::delete_multi(keys).command);
        assert!(matches!(result, Err(KeyValueStoreError::BatchTooLarge { .. })));
    }

    #[test]
    fn test_validate_accepts_normal_commands() {
        assert!(validate_write_command(&WriteRequest::set("a", "1").command).is_ok());
        assert!(validate_write_command(&WriteRequest::compare_and_swap("a", Some("1".into()), "2").command).is_ok());
        assert!(validate_write_command(&WriteRequest::compare_and_delete("a", "2").command).is_ok());
    }

    #[test]
    fn test_read_result_value() {
        let empty = ReadResult { kv: None };
        assert_eq!(empty.value(), None);

        let present = ReadResult {
            kv: Some(KeyValueWithRevision {
                key: "a".into(),
                value: "1".into(),
                create_revision: 1,
                mod_revision: 1,
            }),
        };
        assert_eq!(present.value(), Some("1"));
    }
}
