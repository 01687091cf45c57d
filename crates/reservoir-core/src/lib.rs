//! Shared building blocks for the reservoir crates.
//!
//! This crate defines the narrow key-value capability that the coordination
//! primitives are built on, together with the request/response types, error
//! type and fixed limits they share.
//!
//! - [`KeyValueStore`] - async trait over read, write (including compare-and-swap) and delete
//! - [`DeterministicKeyValueStore`] - in-memory implementation with fault injection, used by tests and the
//!   simulator
//! - [`constants`] - timeouts, retry bounds and size limits

pub mod constants;
pub mod error;
pub mod inmemory;
pub mod kv;
pub mod traits;
pub mod utils;

pub use error::KeyValueStoreError;
pub use inmemory::DeterministicKeyValueStore;
pub use kv::DeleteRequest;
pub use kv::DeleteResult;
pub use kv::KeyValueWithRevision;
pub use kv::ReadRequest;
pub use kv::ReadResult;
pub use kv::WriteCommand;
pub use kv::WriteRequest;
pub use kv::WriteResult;
pub use kv::validate_write_command;
pub use traits::KeyValueStore;
pub use utils::now_unix_ms;
