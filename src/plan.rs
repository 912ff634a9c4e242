mod analyze;
mod bind;
mod compile;
mod context;
mod execute;
mod partition;

pub use crate::plan::{
    compile::{Command, LogicStream},
    context::Frame,
    execute::Barrier,
    partition::{PartitionNode, PartitionPolicy, RoundRobin},
};
use crate::{
    backend::{DeviceStream, StreamHandlerRegistry},
    config::{Config, PlanOptions},
    error::{ExecuteError, PlanError},
    graph::Graph,
    plan::{
        analyze::allocate_notifications,
        bind::{StreamRef, bind_device_streams},
        compile::{check_waits, compile},
        context::{ExecutionContext, validate_fetches},
        partition::partition,
    },
    types::{NodeId, NotificationId, ValueId},
};
use core::{fmt, num::NonZeroUsize};
use derive_more::Debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// A graph compiled into concurrently runnable logic streams.
///
/// Built once per graph:
/// 1. nodes are partitioned into logic streams by the configured
///    [`PartitionPolicy`],
/// 2. one notification is allocated per node with a consumer in another
///    logic stream,
/// 3. each logic stream gets one device stream per backend its nodes use,
/// 4. each logic stream's nodes are compiled into wait / execute / signal
///    [`Command`]s.
///
/// The schedule is immutable afterwards. [`execute`](Self::execute) may be
/// called any number of times, also concurrently: each call owns its frame,
/// notification handles, and barriers. Concurrent calls need an inter-op pool
/// large enough for all their dispatched streams (see
/// [`PlanOptions::inter_op_threads`] and
/// [`max_concurrent_runs`](Self::max_concurrent_runs)).
#[must_use]
#[derive(Debug)]
pub struct ParallelExecutionPlan<C: Config> {
    shared: Arc<PlanShared<C>>,
    #[debug(skip)]
    inter_op: Option<ThreadPool>,
}

#[derive(Debug)]
struct PlanShared<C: Config> {
    graph: Arc<Graph<C>>,
    logic_streams: Vec<LogicStream>,
    node_streams: Vec<StreamRef>,
    notification_owners: Vec<StreamRef>,
    #[debug(skip)]
    intra_op: Arc<ThreadPool>,
}

impl<C: Config> PlanShared<C> {
    fn stream(&self, at: StreamRef) -> &DeviceStream {
        &self.logic_streams[at.logic_stream].device_streams[at.slot]
    }
}

impl<C: Config> ParallelExecutionPlan<C> {
    /// Build the schedule of `graph`.
    ///
    /// Device streams are created through `registry` and live as long as the
    /// plan.
    ///
    /// # Errors
    /// Any [`PlanError`]: invalid options, a backend without registered
    /// handlers, an unsupported cross-backend wait, an invalid partition, or a
    /// backend failing to create a stream.
    pub fn new(
        graph: Arc<Graph<C>>,
        registry: &StreamHandlerRegistry,
        options: &PlanOptions,
    ) -> Result<Self, PlanError> {
        let num_streams =
            NonZeroUsize::new(options.num_logic_streams).ok_or(PlanError::NoLogicStreams)?;
        for node in graph.nodes() {
            if !registry.is_registered(node.backend()) {
                return Err(PlanError::MissingBackend {
                    node: node.id(),
                    backend: node.backend(),
                });
            }
        }
        let inter_op = build_inter_op_pool(num_streams, options.inter_op_threads)?;
        let intra_op = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(options.intra_op_threads.unwrap_or(0))
                .thread_name(|idx| format!("mss-intra-op-{idx}"))
                .build()?,
        );

        let partition = partition(&graph, options.partitioner.as_ref(), num_streams)?;
        let notifications = allocate_notifications(&graph, &partition);
        let binding = bind_device_streams(&graph, &partition, &notifications, registry)?;
        check_waits(&graph, &notifications, &binding)?;
        let node_streams = binding.node_streams;
        let notification_owners = binding.notification_owners;
        let logic_streams = compile(
            partition,
            &notifications,
            binding.device_streams,
            &node_streams,
        );

        let plan = Self {
            shared: Arc::new(PlanShared {
                graph,
                logic_streams,
                node_streams,
                notification_owners,
                intra_op,
            }),
            inter_op,
        };
        tracing::info!(
            nodes = plan.shared.graph.num_nodes(),
            logic_streams = num_streams.get(),
            notifications = plan.num_notifications(),
            "parallel execution plan built"
        );
        tracing::debug!("schedule:\n{plan}");
        Ok(plan)
    }

    /// Run the graph once.
    ///
    /// The first `N - 1` logic streams are dispatched to the inter-op pool and
    /// the last one runs on the calling thread; the call returns after every
    /// stream has finished and flushed its device streams.
    ///
    /// # Errors
    /// Invalid feeds or fetches are rejected before anything runs. Otherwise
    /// the first kernel or backend failure of the run is returned, after all
    /// streams have stopped and every notification handle was released.
    pub fn execute(
        &self,
        feeds: impl IntoIterator<Item = (ValueId, C::Value)>,
        fetches: &[ValueId],
    ) -> Result<Vec<C::Value>, ExecuteError> {
        let shared = &self.shared;
        let frame = Frame::with_feeds(&shared.graph, feeds)?;
        validate_fetches(&shared.graph, fetches)?;
        let owners = shared
            .notification_owners
            .iter()
            .map(|&owner| shared.stream(owner));
        let ctx = Arc::new(ExecutionContext::new(
            frame,
            owners,
            Arc::clone(&shared.intra_op),
        )?);

        let (last, dispatched) = shared
            .logic_streams
            .split_last()
            .expect("ParallelExecutionPlan::execute: [1]");
        let barriers: Arc<[Barrier]> = dispatched.iter().map(|_| Barrier::new()).collect();
        if !dispatched.is_empty() {
            let inter_op = self
                .inter_op
                .as_ref()
                .expect("ParallelExecutionPlan::execute: [2]");
            tracing::debug!(dispatched = dispatched.len(), "dispatching logic streams");
            for idx in 0..dispatched.len() {
                let shared = Arc::clone(shared);
                let ctx = Arc::clone(&ctx);
                let barriers = Arc::clone(&barriers);
                inter_op.spawn(move || {
                    shared.logic_streams[idx].run(&shared.graph, &ctx);
                    // Nothing of the run may outlive the barrier.
                    drop(ctx);
                    drop(shared);
                    barriers[idx].set();
                });
            }
        }
        last.run(&shared.graph, &ctx);
        for barrier in barriers.iter() {
            barrier.wait();
        }

        let ctx = Arc::into_inner(ctx).expect("ParallelExecutionPlan::execute: [3]");
        let (frame, error) = ctx.finish();
        if let Some(err) = error {
            return Err(err);
        }
        frame.fetch(fetches)
    }

    /// The graph the plan was built from.
    #[must_use]
    pub fn graph(&self) -> &Arc<Graph<C>> {
        &self.shared.graph
    }

    /// The compiled logic streams.
    #[must_use]
    pub fn logic_streams(&self) -> &[LogicStream] {
        &self.shared.logic_streams
    }

    /// Number of notifications allocated per run.
    #[must_use]
    pub fn num_notifications(&self) -> usize {
        self.shared.notification_owners.len()
    }

    /// Device stream that signals notification `id`.
    #[must_use]
    pub fn notification_owner(&self, id: NotificationId) -> Option<&DeviceStream> {
        let owner = *self.shared.notification_owners.get(id.index())?;
        Some(self.shared.stream(owner))
    }

    /// How many [`execute`](Self::execute) calls may run at once without
    /// queueing a dispatched stream behind another run's blocked one. `None`
    /// for a single-stream plan, which dispatches nothing.
    #[must_use]
    pub fn max_concurrent_runs(&self) -> Option<usize> {
        let dispatched = self.shared.logic_streams.len() - 1;
        let pool = self.inter_op.as_ref()?;
        Some(pool.current_num_threads() / dispatched)
    }

    /// Index of the logic stream running `node`.
    #[must_use]
    pub fn logic_stream_for_node(&self, node: NodeId) -> Option<usize> {
        self.shared
            .node_streams
            .get(node.index())
            .map(|at| at.logic_stream)
    }

    /// Device stream running `node`.
    #[must_use]
    pub fn device_stream_for_node(&self, node: NodeId) -> Option<&DeviceStream> {
        let at = *self.shared.node_streams.get(node.index())?;
        Some(self.shared.stream(at))
    }
}

fn build_inter_op_pool(
    num_streams: NonZeroUsize,
    threads: Option<usize>,
) -> Result<Option<ThreadPool>, PlanError> {
    let required = num_streams.get() - 1;
    if required == 0 {
        return Ok(None);
    }
    let available = threads.unwrap_or(required);
    // Waits block their thread, so a stream queued behind a blocked one
    // could starve its own producer.
    if available < required {
        return Err(PlanError::InsufficientInterOpThreads {
            required,
            available,
        });
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(available)
        .thread_name(|idx| format!("mss-inter-op-{idx}"))
        .build()?;
    tracing::debug!(
        threads = available,
        concurrent_runs = available / required,
        "inter-op pool built"
    );
    Ok(Some(pool))
}

/// Renders the schedule as one column per logic stream, listing each
/// stream's nodes as `OpType(node)` in execution order.
impl<C: Config> fmt::Display for ParallelExecutionPlan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const WIDTH: usize = 24;
        let graph = &self.shared.graph;
        let streams = &self.shared.logic_streams;
        writeln!(f, "{} logic stream(s)", streams.len())?;
        for idx in 0..streams.len() {
            write!(f, "{:<WIDTH$}", format!("-- stream {idx}"))?;
        }
        writeln!(f)?;
        let rows = streams.iter().map(|s| s.nodes.len()).max().unwrap_or(0);
        for row in 0..rows {
            for stream in streams {
                let cell = stream.nodes.get(row).map_or_else(String::new, |&node| {
                    format!("{}({})", graph.node(node).op_type(), node.index())
                });
                write!(f, "{cell:<WIDTH$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
