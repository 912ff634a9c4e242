use crate::{
    backend::{BackendType, DeviceStream, StreamHandlerRegistry},
    config::Config,
    error::PlanError,
    graph::Graph,
    plan::{analyze::NotificationTable, partition::Partition},
    types::IndexMap,
};
use std::sync::Arc;

/// Location of a device stream: logic stream index and slot within it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct StreamRef {
    pub(super) logic_stream: usize,
    pub(super) slot: usize,
}

/// Device streams created for a partition.
#[derive(Debug)]
pub(super) struct Binding {
    /// Device streams of each logic stream, one per distinct backend, in
    /// first-use order.
    pub(super) device_streams: Vec<Vec<DeviceStream>>,
    /// Stream executing each node, indexed by `NodeId`.
    pub(super) node_streams: Vec<StreamRef>,
    /// Stream owning each notification, indexed by `NotificationId`.
    pub(super) notification_owners: Vec<StreamRef>,
}

impl Binding {
    pub(super) fn stream(&self, at: StreamRef) -> &DeviceStream {
        &self.device_streams[at.logic_stream][at.slot]
    }
}

/// Create one device stream per backend used in each logic stream and bind
/// every node and notification to one of them.
///
/// Streams created before a failure are released when the partial binding is
/// dropped.
pub(super) fn bind_device_streams<C: Config>(
    graph: &Graph<C>,
    partition: &Partition,
    notifications: &NotificationTable,
    registry: &StreamHandlerRegistry,
) -> Result<Binding, PlanError> {
    let unbound = StreamRef {
        logic_stream: usize::MAX,
        slot: usize::MAX,
    };
    let mut node_streams = vec![unbound; graph.num_nodes()];
    let mut device_streams = Vec::with_capacity(partition.nodes_in_stream.len());

    for (logic_stream, nodes) in partition.nodes_in_stream.iter().enumerate() {
        let mut slots: IndexMap<BackendType, usize> = IndexMap::default();
        let mut streams = Vec::new();
        for &node in nodes {
            let backend = graph.node(node).backend();
            let slot = match slots.get(&backend) {
                Some(&slot) => slot,
                None => {
                    let handler = registry
                        .handler(backend)
                        .ok_or(PlanError::MissingBackend { node, backend })?;
                    streams.push(DeviceStream::create(backend, Arc::clone(handler))?);
                    let slot = streams.len() - 1;
                    slots.insert(backend, slot);
                    slot
                }
            };
            node_streams[node.index()] = StreamRef { logic_stream, slot };
        }
        device_streams.push(streams);
    }

    let notification_owners = notifications
        .producers
        .iter()
        .map(|producer| node_streams[producer.index()])
        .collect();

    Ok(Binding {
        device_streams,
        node_streams,
        notification_owners,
    })
}
