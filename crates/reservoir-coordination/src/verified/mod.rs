//! Pure functions for the coordination primitives.
//!
//! All functions are deterministic: no I/O, no system calls, time passed as
//! an explicit parameter. The async managers call into these so the decision
//! logic can be tested without a store.
//!
//! - [`counter`]: permit parsing, acquire/release arithmetic, force-set guard
//! - [`rwlock`]: key layout, expiry, reader/writer admission, fencing tokens

pub mod counter;
pub mod rwlock;

pub use counter::*;
pub use rwlock::*;
