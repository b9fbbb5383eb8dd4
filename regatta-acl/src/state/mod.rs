//! Replicated ACL state, read through cheap immutable snapshots.
//!
//! The store is MVCC by replacement: every applied mutation installs fresh
//! map images behind `Arc`s, so a [`Snapshot`] taken before a write keeps
//! observing the pre-write world without blocking the writer. Each table
//! carries its own monotonic index, assigned by the replication layer.

pub mod paginator;
mod store;
mod watch;

pub use store::{Snapshot, StateStore};
pub use watch::WatchSet;

/// Identifies one logical table for indexes and watch subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    Policies,
    Roles,
    Tokens,
    AuthMethods,
    BindingRules,
    OneTimeTokens,
    Allocations,
    Nodes,
}

impl TableId {
    pub(crate) const COUNT: usize = 8;

    pub(crate) const fn pos(self) -> usize {
        match self {
            TableId::Policies => 0,
            TableId::Roles => 1,
            TableId::Tokens => 2,
            TableId::AuthMethods => 3,
            TableId::BindingRules => 4,
            TableId::OneTimeTokens => 5,
            TableId::Allocations => 6,
            TableId::Nodes => 7,
        }
    }
}
