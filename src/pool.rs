//! The two counter pools kept per resource and their key layout.

use serde::Deserialize;
use serde::Serialize;

/// A counter pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Immediately consumable units.
    Available,
    /// Units reserved but not yet consumed.
    PreLocked,
}

impl Pool {
    pub const ALL: [Pool; 2] = [Pool::Available, Pool::PreLocked];

    /// Key prefix shared by the pool's counters, drift markers and locks.
    pub fn prefix(&self) -> &'static str {
        match self {
            Pool::Available => "resource_available",
            Pool::PreLocked => "resource_pre_lock",
        }
    }

    /// `{prefix}:{id}`
    pub fn counter_key(&self, resource_id: &str) -> String {
        format!("{}:{}", self.prefix(), resource_id)
    }

    /// `{prefix}-drift:{id}`
    pub fn drift_key(&self, resource_id: &str) -> String {
        format!("{}-drift:{}", self.prefix(), resource_id)
    }

    /// `{prefix}-lock:{id}`
    pub fn lock_name(&self, resource_id: &str) -> String {
        format!("{}-lock:{}", self.prefix(), resource_id)
    }

    /// Index into per-pool arrays.
    pub(crate) fn index(&self) -> usize {
        match self {
            Pool::Available => 0,
            Pool::PreLocked => 1,
        }
    }
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}
