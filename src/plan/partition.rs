use crate::{
    backend::BackendType,
    config::Config,
    error::PlanError,
    graph::Graph,
    types::NodeId,
};
use core::{fmt::Debug, num::NonZeroUsize};

/// A node as seen by a [`PartitionPolicy`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartitionNode<'a> {
    /// Id of the node.
    pub id: NodeId,
    /// Operator type.
    pub op_type: &'a str,
    /// Backend the node runs on.
    pub backend: BackendType,
}

/// Assigns graph nodes to logic streams.
///
/// Any assignment yields a correct plan: each logic stream keeps its nodes in
/// topological order and every cross-stream edge is synchronized. A policy
/// therefore only decides how much concurrency a plan exposes.
pub trait PartitionPolicy: Debug + Send + Sync {
    /// Return one stream index in `0..num_streams` per entry of `nodes`.
    ///
    /// `nodes` is in topological order.
    fn assign(&self, nodes: &[PartitionNode<'_>], num_streams: NonZeroUsize) -> Vec<usize>;
}

/// Deals nodes to streams in turn: the `i`-th node in topological order goes
/// to stream `i % num_streams`.
#[derive(Debug, Default, Copy, Clone)]
pub struct RoundRobin;

impl PartitionPolicy for RoundRobin {
    fn assign(&self, nodes: &[PartitionNode<'_>], num_streams: NonZeroUsize) -> Vec<usize> {
        (0..nodes.len()).map(|idx| idx % num_streams).collect()
    }
}

/// Nodes of every logic stream, each list in topological order.
#[derive(Debug)]
pub(super) struct Partition {
    /// Logic stream of each node, indexed by `NodeId`.
    pub(super) stream_of: Vec<usize>,
    pub(super) nodes_in_stream: Vec<Vec<NodeId>>,
}

impl Partition {
    pub(super) fn crosses(&self, lhs: NodeId, rhs: NodeId) -> bool {
        self.stream_of[lhs.index()] != self.stream_of[rhs.index()]
    }
}

pub(super) fn partition<C: Config>(
    graph: &Graph<C>,
    policy: &dyn PartitionPolicy,
    num_streams: NonZeroUsize,
) -> Result<Partition, PlanError> {
    let order = graph.topological_order();
    let nodes: Vec<PartitionNode<'_>> = order
        .iter()
        .map(|&id| {
            let node = graph.node(id);
            PartitionNode {
                id,
                op_type: node.op_type(),
                backend: node.backend(),
            }
        })
        .collect();
    let assignment = policy.assign(&nodes, num_streams);
    if assignment.len() != nodes.len() {
        return Err(PlanError::PartitionLength {
            expected: nodes.len(),
            actual: assignment.len(),
        });
    }

    let mut stream_of = vec![0; graph.num_nodes()];
    let mut nodes_in_stream = vec![Vec::new(); num_streams.get()];
    for (&node, stream) in order.iter().zip(assignment) {
        let Some(nodes) = nodes_in_stream.get_mut(stream) else {
            return Err(PlanError::InvalidStreamIndex {
                node,
                stream,
                num_streams: num_streams.get(),
            });
        };
        nodes.push(node);
        stream_of[node.index()] = stream;
    }
    Ok(Partition {
        stream_of,
        nodes_in_stream,
    })
}
