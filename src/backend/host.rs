use crate::{
    backend::{BackendError, BackendType, NotificationHandle, StreamHandle, StreamHandler},
    types::{HashMap, HashSet},
};
use parking_lot::{Condvar, Mutex};
use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

/// Stream handler for host execution.
///
/// Host streams run their work synchronously on the submitting thread, so
/// flushing only validates the handle. Notifications are condvar-backed
/// events: [`notify`](StreamHandler::notify) sets the event and
/// [`wait`](StreamHandler::wait) blocks the calling thread until it is set,
/// which is valid for consumers of every backend.
///
/// The same handler type can be registered under several [`BackendType`]s,
/// e.g. to emulate an accelerator in tests.
#[derive(Debug)]
pub struct HostStreamHandler {
    backend: BackendType,
    next_handle: AtomicU64,
    streams: Mutex<HashSet<u64>>,
    events: Mutex<HashMap<u64, Arc<HostEvent>>>,
    counters: Counters,
}

#[derive(Debug, Default)]
struct HostEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct Counters {
    streams_created: AtomicUsize,
    streams_released: AtomicUsize,
    streams_flushed: AtomicUsize,
    notifications_created: AtomicUsize,
    notifications_released: AtomicUsize,
    notifications_signaled: AtomicUsize,
}

/// Snapshot of a [`HostStreamHandler`]'s lifetime counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HostCounters {
    /// Streams created.
    pub streams_created: usize,
    /// Streams released.
    pub streams_released: usize,
    /// Flush calls.
    pub streams_flushed: usize,
    /// Notifications created.
    pub notifications_created: usize,
    /// Notifications released.
    pub notifications_released: usize,
    /// Notify calls.
    pub notifications_signaled: usize,
}

impl HostCounters {
    /// Streams created but not yet released.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.streams_created - self.streams_released
    }

    /// Notifications created but not yet released.
    #[must_use]
    pub fn live_notifications(&self) -> usize {
        self.notifications_created - self.notifications_released
    }
}

impl HostStreamHandler {
    /// A handler reporting errors as `backend`.
    #[must_use]
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            next_handle: AtomicU64::new(1),
            streams: Mutex::default(),
            events: Mutex::default(),
            counters: Counters::default(),
        }
    }

    /// Current counter values.
    #[must_use]
    pub fn counters(&self) -> HostCounters {
        let Counters {
            streams_created,
            streams_released,
            streams_flushed,
            notifications_created,
            notifications_released,
            notifications_signaled,
        } = &self.counters;
        HostCounters {
            streams_created: streams_created.load(Ordering::Acquire),
            streams_released: streams_released.load(Ordering::Acquire),
            streams_flushed: streams_flushed.load(Ordering::Acquire),
            notifications_created: notifications_created.load(Ordering::Acquire),
            notifications_released: notifications_released.load(Ordering::Acquire),
            notifications_signaled: notifications_signaled.load(Ordering::Acquire),
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn error(&self, operation: &'static str, message: impl Into<String>) -> BackendError {
        BackendError::new(self.backend, operation, message)
    }

    fn event(&self, notification: NotificationHandle, operation: &'static str) -> Result<Arc<HostEvent>, BackendError> {
        self.events
            .lock()
            .get(&notification.0)
            .cloned()
            .ok_or_else(|| self.error(operation, format!("unknown {notification}")))
    }

    fn check_stream(&self, stream: StreamHandle, operation: &'static str) -> Result<(), BackendError> {
        if self.streams.lock().contains(&stream.0) {
            Ok(())
        } else {
            Err(self.error(operation, format!("unknown {stream}")))
        }
    }
}

impl StreamHandler for HostStreamHandler {
    fn create_stream(&self) -> Result<StreamHandle, BackendError> {
        let handle = self.next_handle();
        self.streams.lock().insert(handle);
        self.counters.streams_created.fetch_add(1, Ordering::AcqRel);
        Ok(StreamHandle(handle))
    }

    fn release_stream(&self, stream: StreamHandle) -> Result<(), BackendError> {
        if !self.streams.lock().remove(&stream.0) {
            return Err(self.error("release stream", format!("unknown {stream}")));
        }
        self.counters.streams_released.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn flush_stream(&self, stream: StreamHandle) -> Result<(), BackendError> {
        self.check_stream(stream, "flush stream")?;
        self.counters.streams_flushed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn create_notification(&self, owner: StreamHandle) -> Result<NotificationHandle, BackendError> {
        self.check_stream(owner, "create notification")?;
        let handle = self.next_handle();
        self.events.lock().insert(handle, Arc::default());
        self.counters.notifications_created.fetch_add(1, Ordering::AcqRel);
        Ok(NotificationHandle(handle))
    }

    fn release_notification(&self, notification: NotificationHandle) -> Result<(), BackendError> {
        let Some(event) = self.events.lock().remove(&notification.0) else {
            return Err(self.error("release notification", format!("unknown {notification}")));
        };
        // Waiters still holding the event must not block forever.
        *event.signaled.lock() = true;
        event.cond.notify_all();
        self.counters.notifications_released.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn notify(&self, owner: StreamHandle, notification: NotificationHandle) -> Result<(), BackendError> {
        self.check_stream(owner, "notify")?;
        let event = self.event(notification, "notify")?;
        *event.signaled.lock() = true;
        event.cond.notify_all();
        self.counters.notifications_signaled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn wait(
        &self,
        _consumer: BackendType,
        _consumer_stream: StreamHandle,
        notification: NotificationHandle,
    ) -> Result<(), BackendError> {
        let event = self.event(notification, "wait")?;
        let mut signaled = event.signaled.lock();
        while !*signaled {
            event.cond.wait(&mut signaled);
        }
        Ok(())
    }
}
