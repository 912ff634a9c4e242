mod host;
mod registry;

pub use crate::backend::{
    host::{HostCounters, HostStreamHandler},
    registry::{RegistryError, StreamHandlerRegistry},
};
use core::fmt::Debug;
use derive_more::Display;
use std::sync::Arc;
use thiserror::Error;

/// Stable identifier of an execution backend (execution provider).
///
/// Keys the [`StreamHandlerRegistry`] and is recorded on every node.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum BackendType {
    /// Host CPU.
    #[display("cpu")]
    Cpu,
    /// NVIDIA CUDA device.
    #[display("cuda")]
    Cuda,
    /// AMD ROCm device.
    #[display("rocm")]
    Rocm,
    /// Apple Metal device.
    #[display("metal")]
    Metal,
    /// Any other backend, distinguished by a host-chosen number.
    #[display("custom:{_0}")]
    Custom(u16),
}

/// Opaque backend-specific handle of a device stream.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("stream:{_0:#x}")]
pub struct StreamHandle(pub u64);

/// Opaque backend-specific handle of a notification.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("notification:{_0:#x}")]
pub struct NotificationHandle(pub u64);

/// Failure reported by a backend stream or notification primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{backend} backend failed to {operation}: {message}")]
pub struct BackendError {
    /// Backend that reported the failure.
    pub backend: BackendType,
    /// The primitive that failed, e.g. `"create stream"`.
    pub operation: &'static str,
    /// Backend-provided description.
    pub message: String,
}

impl BackendError {
    /// Build an error for `operation` on `backend`.
    #[must_use]
    pub fn new(backend: BackendType, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            operation,
            message: message.into(),
        }
    }
}

/// Stream and notification primitives of one backend.
///
/// Implemented once per backend and registered into a
/// [`StreamHandlerRegistry`] before the first plan is built.
///
/// Notification methods are always called on the handler of the backend that
/// owns the notification (the producer). In particular [`wait`] is invoked on
/// the producer's handler with the consumer's backend and stream, so a
/// backend decides how each kind of consumer can wait on its notifications.
///
/// [`wait`]: StreamHandler::wait
pub trait StreamHandler: Debug + Send + Sync {
    /// Create a new device stream.
    ///
    /// # Errors
    /// If the backend cannot allocate a stream.
    fn create_stream(&self) -> Result<StreamHandle, BackendError>;

    /// Release a stream created by [`create_stream`](Self::create_stream).
    ///
    /// # Errors
    /// If the handle is unknown or the backend fails to release it.
    fn release_stream(&self, stream: StreamHandle) -> Result<(), BackendError>;

    /// Block until all work submitted to `stream` has drained.
    ///
    /// # Errors
    /// If the backend reports a failure while draining.
    fn flush_stream(&self, stream: StreamHandle) -> Result<(), BackendError>;

    /// Create a notification signaled from `owner`.
    ///
    /// # Errors
    /// If the backend cannot allocate the notification.
    fn create_notification(&self, owner: StreamHandle) -> Result<NotificationHandle, BackendError>;

    /// Release a notification created by
    /// [`create_notification`](Self::create_notification).
    ///
    /// Streams still blocked in [`wait`](Self::wait) on it must be woken; a
    /// later `wait` on the released handle must fail rather than block.
    ///
    /// # Errors
    /// If the handle is unknown or the backend fails to release it.
    fn release_notification(&self, notification: NotificationHandle) -> Result<(), BackendError>;

    /// Signal `notification` once all work submitted to `owner` so far has
    /// completed.
    ///
    /// # Errors
    /// If the handle is unknown or the backend fails to record the signal.
    fn notify(&self, owner: StreamHandle, notification: NotificationHandle) -> Result<(), BackendError>;

    /// Whether a stream of the `consumer` backend can wait on this backend's
    /// notifications. Checked once per cross-stream edge at plan-build time.
    fn supports_wait(&self, consumer: BackendType) -> bool {
        let _ = consumer;
        true
    }

    /// Make `consumer_stream` (of backend `consumer`) wait until
    /// `notification` is signaled. Only work subsequently submitted to that
    /// stream is ordered after the signal.
    ///
    /// # Errors
    /// If the handle is unknown or the backend fails to enqueue the wait.
    fn wait(
        &self,
        consumer: BackendType,
        consumer_stream: StreamHandle,
        notification: NotificationHandle,
    ) -> Result<(), BackendError>;
}

/// A backend-specific ordered execution queue owned by one logic stream.
///
/// The stream is released through its backend when dropped.
#[derive(Debug)]
pub struct DeviceStream {
    backend: BackendType,
    handle: StreamHandle,
    handler: Arc<dyn StreamHandler>,
}

impl DeviceStream {
    pub(crate) fn create(
        backend: BackendType,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Self, BackendError> {
        let handle = handler.create_stream()?;
        tracing::trace!(%backend, %handle, "device stream created");
        Ok(Self {
            backend,
            handle,
            handler,
        })
    }

    /// Backend executing this stream.
    #[must_use]
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Backend handle of this stream.
    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub(crate) fn handler(&self) -> &Arc<dyn StreamHandler> {
        &self.handler
    }

    pub(crate) fn flush(&self) -> Result<(), BackendError> {
        self.handler.flush_stream(self.handle)
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        if let Err(err) = self.handler.release_stream(self.handle) {
            tracing::warn!(backend = %self.backend, handle = %self.handle, %err, "failed to release device stream");
        }
    }
}
