use crate::{
    backend::DeviceStream,
    config::Config,
    error::PlanError,
    graph::Graph,
    plan::{
        analyze::NotificationTable,
        bind::{Binding, StreamRef},
        partition::Partition,
    },
    types::{HashSet, NodeId, NotificationId},
};

/// One step of a logic stream.
///
/// `slot` indexes [`LogicStream::device_streams`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Order subsequent work on the device stream at `slot` after the
    /// notification is signaled.
    Wait {
        /// Awaited notification.
        notification: NotificationId,
        /// Waiting device stream.
        slot: usize,
    },
    /// Run the kernel of `node` on the device stream at `slot`.
    Execute {
        /// The node.
        node: NodeId,
        /// Executing device stream.
        slot: usize,
    },
    /// Signal the notification from the device stream at `slot`.
    Signal {
        /// Signaled notification.
        notification: NotificationId,
        /// Owning device stream.
        slot: usize,
    },
}

/// A sequential instruction list spanning one or more device streams.
///
/// Commands run strictly in order. The logic stream owns its device streams
/// and releases them when the plan is dropped.
#[must_use]
#[derive(Debug)]
pub struct LogicStream {
    pub(super) device_streams: Vec<DeviceStream>,
    pub(super) commands: Vec<Command>,
    pub(super) nodes: Vec<NodeId>,
    /// Notifications signaled from this stream.
    pub(super) owned_notifications: Vec<NotificationId>,
}

impl LogicStream {
    /// The instruction list.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Device streams, one per backend used by the stream's nodes.
    #[must_use]
    pub fn device_streams(&self) -> &[DeviceStream] {
        &self.device_streams
    }

    /// Nodes assigned to the stream, in execution order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Notifications this stream signals.
    #[must_use]
    pub fn owned_notifications(&self) -> &[NotificationId] {
        &self.owned_notifications
    }
}

/// Reject plans where a consumer backend cannot wait on the notification of
/// a producer in another logic stream.
pub(super) fn check_waits<C: Config>(
    graph: &Graph<C>,
    notifications: &NotificationTable,
    binding: &Binding,
) -> Result<(), PlanError> {
    for (node, waits) in &notifications.waits {
        let consumer = graph.node(*node).backend();
        for notification in waits {
            let owner = binding.stream(binding.notification_owners[notification.index()]);
            if !owner.handler().supports_wait(consumer) {
                return Err(PlanError::UnsupportedWait {
                    producer: owner.backend(),
                    consumer,
                });
            }
        }
    }
    Ok(())
}

/// Emit the wait / execute / signal sequence of every logic stream, moving
/// the bound device streams into their logic streams.
///
/// A node is preceded by a wait for each notification it needs that its
/// device stream has not already waited on, and followed by a signal when it
/// produces a notification.
pub(super) fn compile(
    partition: Partition,
    notifications: &NotificationTable,
    device_streams: Vec<Vec<DeviceStream>>,
    node_streams: &[StreamRef],
) -> Vec<LogicStream> {
    partition
        .nodes_in_stream
        .into_iter()
        .zip(device_streams)
        .map(|(nodes, device_streams)| {
            let mut commands = Vec::with_capacity(nodes.len());
            let mut owned_notifications = Vec::new();
            let mut waited: HashSet<(NotificationId, usize)> = HashSet::default();
            for &node in &nodes {
                let slot = node_streams[node.index()].slot;
                for &notification in notifications.awaited_by(node) {
                    if waited.insert((notification, slot)) {
                        commands.push(Command::Wait { notification, slot });
                    }
                }
                commands.push(Command::Execute { node, slot });
                if let Some(notification) = notifications.signaled_by(node) {
                    commands.push(Command::Signal { notification, slot });
                    owned_notifications.push(notification);
                }
            }
            LogicStream {
                device_streams,
                commands,
                nodes,
                owned_notifications,
            }
        })
        .collect()
}
