use crate::{
    backend::{BackendError, BackendType},
    kernel::KernelError,
    types::{NodeId, ValueId},
};
use thiserror::Error;

/// Error returned by
/// [`ParallelExecutionPlan::new`](crate::plan::ParallelExecutionPlan::new).
///
/// Every variant is detected before any kernel runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanError {
    /// `num_logic_streams` was 0.
    #[error("a plan needs at least one logic stream")]
    NoLogicStreams,
    /// A node is assigned to a backend with no registered stream handler.
    #[error("{node} runs on backend {backend}, which has no registered stream handler")]
    MissingBackend {
        /// The node.
        node: NodeId,
        /// Its backend.
        backend: BackendType,
    },
    /// A cross-stream edge needs a wait the producer backend cannot provide.
    #[error("{consumer} streams cannot wait on notifications of backend {producer}")]
    UnsupportedWait {
        /// Backend owning the notification.
        producer: BackendType,
        /// Backend of the waiting stream.
        consumer: BackendType,
    },
    /// The partition policy returned the wrong number of assignments.
    #[error("partition policy assigned {actual} nodes, expected {expected}")]
    PartitionLength {
        /// Nodes in the graph.
        expected: usize,
        /// Assignments returned.
        actual: usize,
    },
    /// The partition policy returned an out-of-range stream index.
    #[error("partition policy assigned {node} to stream {stream} of {num_streams}")]
    InvalidStreamIndex {
        /// The node.
        node: NodeId,
        /// The returned index.
        stream: usize,
        /// Number of logic streams.
        num_streams: usize,
    },
    /// The inter-op pool cannot run every dispatched stream at once.
    #[error("{required} logic streams are dispatched but the inter-op pool has {available} threads")]
    InsufficientInterOpThreads {
        /// `num_logic_streams - 1`.
        required: usize,
        /// Requested pool size.
        available: usize,
    },
    /// A thread pool could not be built.
    #[error("failed to build thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// A backend failed to create a device stream.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Error returned by
/// [`ParallelExecutionPlan::execute`](crate::plan::ParallelExecutionPlan::execute).
///
/// A run reports the first failure encountered; results of other streams are
/// discarded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// A kernel returned an error.
    #[error("kernel of {node} ({name}) failed")]
    Kernel {
        /// The node.
        node: NodeId,
        /// Its name.
        name: String,
        /// The kernel's error.
        #[source]
        source: KernelError,
    },
    /// A kernel panicked.
    #[error("kernel of {node} ({name}) panicked")]
    KernelPanicked {
        /// The node.
        node: NodeId,
        /// Its name.
        name: String,
    },
    /// A backend notification or flush primitive failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A feed or fetch names a value outside the graph.
    #[error("{0} is not a value of the graph")]
    UnknownValue(ValueId),
    /// A feed targets a value some node produces.
    #[error("{0} is produced by the graph and cannot be fed")]
    NotAGraphInput(ValueId),
    /// The same value is fed twice.
    #[error("{0} is fed more than once")]
    DuplicateFeed(ValueId),
    /// A graph input has no feed.
    #[error("graph input {0} is not fed")]
    MissingFeed(ValueId),
    /// The same value is fetched twice.
    #[error("{0} is fetched more than once")]
    DuplicateFetch(ValueId),
    /// A fetched value was not produced by the run.
    #[error("{0} was not produced")]
    MissingOutput(ValueId),
}
