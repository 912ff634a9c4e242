use derive_more::Display;
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// Index of a node (operator instance) in a [`Graph`](crate::graph::Graph).
///
/// Assigned by [`GraphBuilder::add_node`](crate::graph::GraphBuilder::add_node)
/// in insertion order.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("node#{_0}")]
pub struct NodeId(pub(crate) usize);

/// Index of a value (edge payload) in a [`Graph`](crate::graph::Graph).
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("value#{_0}")]
pub struct ValueId(pub(crate) usize);

/// Index of a cross-stream notification allocated by a plan.
///
/// Ids are dense: a plan with `n` notifications uses `0..n`.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("notification#{_0}")]
pub struct NotificationId(pub(crate) usize);

impl NodeId {
    /// Position of the node in its graph's node table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl ValueId {
    /// Position of the value in its graph's value table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl NotificationId {
    /// Position of the notification in a run's notification table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
pub(crate) type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
