use crate::{
    config::Config,
    graph::Graph,
    plan::partition::Partition,
    types::{HashMap, NodeId, NotificationId},
};

/// Cross-stream synchronization required by a partition.
#[derive(Debug, Default)]
pub(super) struct NotificationTable {
    /// Producer of each notification, indexed by `NotificationId`.
    pub(super) producers: Vec<NodeId>,
    /// Notification signaled by a producer node.
    pub(super) by_producer: HashMap<NodeId, NotificationId>,
    /// Notifications each consumer waits on, in the order of its input nodes.
    pub(super) waits: HashMap<NodeId, Vec<NotificationId>>,
}

impl NotificationTable {
    pub(super) fn signaled_by(&self, node: NodeId) -> Option<NotificationId> {
        self.by_producer.get(&node).copied()
    }

    pub(super) fn awaited_by(&self, node: NodeId) -> &[NotificationId] {
        self.waits.get(&node).map_or(&[], Vec::as_slice)
    }
}

/// Allocate one notification per node with at least one consumer in another
/// logic stream, and record which notifications every consumer awaits.
///
/// Ids are assigned stream by stream, following each stream's node order.
pub(super) fn allocate_notifications<C: Config>(
    graph: &Graph<C>,
    partition: &Partition,
) -> NotificationTable {
    let mut table = NotificationTable::default();
    for nodes in &partition.nodes_in_stream {
        for &node in nodes {
            let crosses = graph
                .node(node)
                .output_nodes()
                .iter()
                .any(|&consumer| partition.crosses(node, consumer));
            if crosses {
                let id = NotificationId(table.producers.len());
                table.producers.push(node);
                table.by_producer.insert(node, id);
            }
        }
    }

    for node in graph.nodes() {
        let consumer = node.id();
        let waits: Vec<NotificationId> = node
            .input_nodes()
            .iter()
            .filter(|&&producer| partition.crosses(producer, consumer))
            .map(|producer| {
                table
                    .signaled_by(*producer)
                    .expect("allocate_notifications: [1]")
            })
            .collect();
        if !waits.is_empty() {
            table.waits.insert(consumer, waits);
        }
    }
    table
}
