//! Distributed coordination primitives built on CAS operations.
//!
//! - [`PermitCounter`] - named integer permit counter with bounded blocking
//!   acquire, release and a guarded forced set
//! - [`RWLockManager`] - named read-write locks with leases, fencing tokens
//!   and all-or-nothing multi-lock acquisition
//!
//! All primitives are built on top of the [`reservoir_core::KeyValueStore`]
//! trait's compare-and-swap, so any store with linearizable CAS can back them.
//!
//! ## Counter Example
//!
//! ```ignore
//! use reservoir_coordination::CounterManager;
//! use tokio_util::sync::CancellationToken;
//!
//! let counters = CounterManager::new(store);
//! let counter = counters.counter("resource_available:sku-1");
//! counter.force_set(10).await?;
//!
//! let cancel = CancellationToken::new();
//! if counter.try_acquire(4, Duration::from_millis(300), &cancel).await? {
//!     // 4 permits taken
//! }
//! ```

mod counter;
mod error;
mod rwlock;
pub mod verified;

pub use counter::CounterManager;
pub use counter::CounterNotifier;
pub use counter::PermitCounter;
pub use error::CoordinationError;
pub use rwlock::LockHandle;
pub use rwlock::LockStatus;
pub use rwlock::RWLockManager;
pub use rwlock::RWLockMode;
pub use rwlock::RWLockState;
pub use rwlock::ReaderEntry;
pub use rwlock::WriterEntry;
