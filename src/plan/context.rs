use crate::{
    backend::{BackendError, DeviceStream, NotificationHandle, StreamHandle, StreamHandler},
    config::Config,
    error::ExecuteError,
    graph::Graph,
    sync::{AtomicBool, Ordering},
    types::{HashSet, NotificationId, ValueId},
};
use derive_more::Debug;
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::sync::{Arc, OnceLock};

/// Values of one run, one write-once slot per graph value.
#[derive(Debug)]
pub struct Frame<C: Config> {
    values: Vec<OnceLock<C::Value>>,
}

impl<C: Config> Frame<C> {
    /// A frame holding `feeds`, checked against the graph's inputs.
    pub(super) fn with_feeds(
        graph: &Graph<C>,
        feeds: impl IntoIterator<Item = (ValueId, C::Value)>,
    ) -> Result<Self, ExecuteError> {
        let values: Vec<OnceLock<C::Value>> =
            (0..graph.num_values()).map(|_| OnceLock::new()).collect();
        for (id, value) in feeds {
            let slot = values.get(id.index()).ok_or(ExecuteError::UnknownValue(id))?;
            if graph.producer(id).is_some() {
                return Err(ExecuteError::NotAGraphInput(id));
            }
            slot.set(value).map_err(|_| ExecuteError::DuplicateFeed(id))?;
        }
        if let Some(missing) = graph.graph_inputs().find(|id| values[id.index()].get().is_none()) {
            return Err(ExecuteError::MissingFeed(missing));
        }
        Ok(Self { values })
    }

    /// Value `id`, if it has been written.
    #[must_use]
    pub fn get(&self, id: ValueId) -> Option<&C::Value> {
        self.values.get(id.index()).and_then(OnceLock::get)
    }

    /// Write value `id`. Gives the value back if the slot is already set or
    /// does not exist.
    pub(crate) fn set(&self, id: ValueId, value: C::Value) -> Result<(), C::Value> {
        match self.values.get(id.index()) {
            Some(slot) => slot.set(value),
            None => Err(value),
        }
    }

    /// Move the requested values out of the frame.
    pub(super) fn fetch(mut self, fetches: &[ValueId]) -> Result<Vec<C::Value>, ExecuteError> {
        fetches
            .iter()
            .map(|&id| {
                self.values
                    .get_mut(id.index())
                    .and_then(OnceLock::take)
                    .ok_or(ExecuteError::MissingOutput(id))
            })
            .collect()
    }
}

/// Check fetch ids before anything runs.
pub(super) fn validate_fetches<C: Config>(
    graph: &Graph<C>,
    fetches: &[ValueId],
) -> Result<(), ExecuteError> {
    let mut seen = HashSet::default();
    for &id in fetches {
        if !graph.contains_value(id) {
            return Err(ExecuteError::UnknownValue(id));
        }
        if !seen.insert(id) {
            return Err(ExecuteError::DuplicateFetch(id));
        }
    }
    Ok(())
}

#[derive(Debug)]
struct Notification {
    handle: NotificationHandle,
    owner_stream: StreamHandle,
    owner: Arc<dyn StreamHandler>,
    signaled: AtomicBool,
    released: AtomicBool,
}

/// Live notification handles of one run, released on drop.
#[derive(Debug)]
struct Notifications(Vec<Notification>);

impl Notifications {
    /// Create one handle per owner, through the owner's backend. Handles
    /// created before a failure are released by the partial table's drop.
    fn create<'a>(owners: impl ExactSizeIterator<Item = &'a DeviceStream>) -> Result<Self, BackendError> {
        let mut notifications = Self(Vec::with_capacity(owners.len()));
        for owner in owners {
            let handle = owner.handler().create_notification(owner.handle())?;
            notifications.0.push(Notification {
                handle,
                owner_stream: owner.handle(),
                owner: Arc::clone(owner.handler()),
                signaled: AtomicBool::new(false),
                released: AtomicBool::new(false),
            });
        }
        Ok(notifications)
    }
}

impl Drop for Notifications {
    fn drop(&mut self) {
        for notification in &self.0 {
            if notification.released.load(Ordering::Acquire) {
                continue;
            }
            if let Err(err) = notification.owner.release_notification(notification.handle) {
                tracing::warn!(handle = %notification.handle, %err, "failed to release notification");
            }
        }
    }
}

/// Mutable state of a single
/// [`execute`](crate::plan::ParallelExecutionPlan::execute) call.
///
/// Owns the value frame and a fresh handle for every notification of the
/// plan. The first failure raises the abort flag that every logic stream
/// checks between commands.
#[derive(Debug)]
pub(super) struct ExecutionContext<C: Config> {
    frame: Frame<C>,
    notifications: Notifications,
    aborted: AtomicBool,
    #[debug(skip)]
    first_error: Mutex<Option<ExecuteError>>,
    #[debug(skip)]
    intra_op: Arc<ThreadPool>,
}

impl<C: Config> ExecutionContext<C> {
    pub(super) fn new<'a>(
        frame: Frame<C>,
        notification_owners: impl ExactSizeIterator<Item = &'a DeviceStream>,
        intra_op: Arc<ThreadPool>,
    ) -> Result<Self, ExecuteError> {
        Ok(Self {
            frame,
            notifications: Notifications::create(notification_owners)?,
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
            intra_op,
        })
    }

    pub(super) fn frame(&self) -> &Frame<C> {
        &self.frame
    }

    pub(super) fn intra_op(&self) -> &ThreadPool {
        &self.intra_op
    }

    pub(super) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Record `err` unless an earlier failure is already recorded, and stop
    /// every stream at its next command.
    pub(super) fn abort(&self, err: ExecuteError) {
        let mut first_error = self.first_error.lock();
        if first_error.is_none() {
            tracing::error!(%err, "aborting run");
            *first_error = Some(err);
        }
        self.aborted.store(true, Ordering::Release);
    }

    /// Make `consumer` wait on notification `id`.
    pub(super) fn wait(&self, id: NotificationId, consumer: &DeviceStream) -> Result<(), BackendError> {
        let notification = &self.notifications.0[id.index()];
        notification
            .owner
            .wait(consumer.backend(), consumer.handle(), notification.handle)
    }

    /// Signal notification `id` from its owning stream. Signaling an already
    /// signaled notification is a no-op; a failed signal can be retried.
    pub(super) fn signal(&self, id: NotificationId) -> Result<(), BackendError> {
        let notification = &self.notifications.0[id.index()];
        if notification.signaled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = notification
            .owner
            .notify(notification.owner_stream, notification.handle);
        if result.is_err() {
            notification.signaled.store(false, Ordering::Release);
        }
        result
    }

    /// Release notification `id` before the run ends, waking its waiters.
    /// Used when the owner cannot signal it. The release on drop skips it.
    pub(super) fn release_early(&self, id: NotificationId) -> Result<(), BackendError> {
        let notification = &self.notifications.0[id.index()];
        if notification.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::warn!(%id, handle = %notification.handle, "releasing unsignaled notification early");
        notification.owner.release_notification(notification.handle)
    }

    /// Release the notifications and split into the frame and the first
    /// recorded failure.
    pub(super) fn finish(self) -> (Frame<C>, Option<ExecuteError>) {
        let Self {
            frame,
            notifications,
            aborted: _,
            first_error,
            intra_op: _,
        } = self;
        drop(notifications);
        (frame, first_error.into_inner())
    }
}
