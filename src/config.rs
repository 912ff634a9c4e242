use crate::{
    kernel::Kernel,
    plan::{PartitionPolicy, RoundRobin},
};
use core::fmt::Debug;
use std::sync::Arc;

/// Configuration entry-point for instantiating a plan.
///
/// A concrete `Config` binds the value type stored in the per-run frame and
/// the kernel type that nodes carry.
pub trait Config: Sized + 'static {
    /// Value produced and consumed by kernels.
    type Value: Debug + Send + Sync + 'static;
    /// The user-defined kernel type invoked for every node.
    type Kernel: Kernel<Self>;
}

/// Runtime options for building a
/// [`ParallelExecutionPlan`](crate::plan::ParallelExecutionPlan).
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Number of logic streams the graph is partitioned into. Must be at
    /// least 1.
    pub num_logic_streams: usize,
    /// Threads in the pool running the dispatched logic streams. `None` means
    /// `num_logic_streams - 1`, which is also the minimum accepted.
    ///
    /// Waits block their thread, so `k` concurrent runs of one plan need
    /// `k * (num_logic_streams - 1)` threads.
    pub inter_op_threads: Option<usize>,
    /// Threads in the pool handed to kernels. `None` lets rayon decide.
    pub intra_op_threads: Option<usize>,
    /// Policy assigning nodes to logic streams.
    pub partitioner: Arc<dyn PartitionPolicy>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            num_logic_streams: 1,
            inter_op_threads: None,
            intra_op_threads: None,
            partitioner: Arc::new(RoundRobin),
        }
    }
}

impl PlanOptions {
    /// Options with `num_logic_streams` streams and defaults otherwise.
    #[must_use]
    pub fn new(num_logic_streams: usize) -> Self {
        Self {
            num_logic_streams,
            ..Self::default()
        }
    }

    /// Set the size of the inter-op pool.
    #[must_use]
    pub fn with_inter_op_threads(mut self, threads: usize) -> Self {
        self.inter_op_threads = Some(threads);
        self
    }

    /// Set the size of the kernel thread pool.
    #[must_use]
    pub fn with_intra_op_threads(mut self, threads: usize) -> Self {
        self.intra_op_threads = Some(threads);
        self
    }

    /// Replace the partition policy.
    #[must_use]
    pub fn with_partitioner(mut self, partitioner: impl PartitionPolicy + 'static) -> Self {
        self.partitioner = Arc::new(partitioner);
        self
    }
}
