use crate::{
    config::Config,
    error::ExecuteError,
    graph::Graph,
    kernel::{Kernel, KernelContext},
    plan::{
        compile::{Command, LogicStream},
        context::ExecutionContext,
    },
    sync::{AtomicBool, Ordering, pause},
};
use std::panic::{self, AssertUnwindSafe};

/// One-shot completion flag joining a dispatched logic stream back to the
/// thread that dispatched it.
///
/// Set exactly once by the stream's task after all its work (including the
/// device stream flush) is done; [`wait`](Self::wait) spins with a yielding
/// pause until then. Everything written before `set` is visible after `wait`
/// returns.
#[derive(Debug)]
pub struct Barrier {
    set: AtomicBool,
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Barrier {
    /// An unset barrier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Mark the barrier as passed.
    pub fn set(&self) {
        self.set.store(true, Ordering::Release);
    }

    /// Whether [`set`](Self::set) has been called.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Block until [`set`](Self::set) is called.
    pub fn wait(&self) {
        while !self.is_set() {
            pause();
        }
    }
}

impl LogicStream {
    /// Replay the command list against `ctx`, then drain the device streams.
    ///
    /// The stream stops at the first failure (its own or another stream's).
    /// On every exit path it signals the notifications it owns that are
    /// still pending, so waiters in other streams are released, and flushes
    /// each device stream. A notification that cannot be signaled is
    /// released instead.
    pub(super) fn run<C: Config>(&self, graph: &Graph<C>, ctx: &ExecutionContext<C>) {
        for command in &self.commands {
            if ctx.is_aborted() {
                break;
            }
            if let Err(err) = self.run_command(*command, graph, ctx) {
                ctx.abort(err);
                break;
            }
        }
        for &notification in &self.owned_notifications {
            if let Err(err) = ctx.signal(notification) {
                ctx.abort(err.into());
                // Releasing wakes the waiters the failed signal left blocked.
                if let Err(err) = ctx.release_early(notification) {
                    ctx.abort(err.into());
                }
            }
        }
        for stream in &self.device_streams {
            if let Err(err) = stream.flush() {
                ctx.abort(err.into());
            }
        }
    }

    fn run_command<C: Config>(
        &self,
        command: Command,
        graph: &Graph<C>,
        ctx: &ExecutionContext<C>,
    ) -> Result<(), ExecuteError> {
        match command {
            Command::Wait { notification, slot } => {
                ctx.wait(notification, &self.device_streams[slot])?;
            }
            Command::Execute { node, slot } => {
                let node = graph.node(node);
                let mut kernel_ctx =
                    KernelContext::new(node, ctx.frame(), &self.device_streams[slot], ctx.intra_op());
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    node.kernel().compute(&mut kernel_ctx)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(source)) => {
                        return Err(ExecuteError::Kernel {
                            node: node.id(),
                            name: node.name().to_owned(),
                            source,
                        });
                    }
                    Err(_) => {
                        return Err(ExecuteError::KernelPanicked {
                            node: node.id(),
                            name: node.name().to_owned(),
                        });
                    }
                }
            }
            Command::Signal { notification, .. } => ctx.signal(notification)?,
        }
        Ok(())
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use std::{sync::Arc, thread};

    #[test]
    fn barrier_publishes_prior_writes() {
        let barrier = Arc::new(Barrier::new());
        let value = Arc::new(AtomicUsize::new(0));
        let worker = {
            let barrier = Arc::clone(&barrier);
            let value = Arc::clone(&value);
            thread::spawn(move || {
                value.store(7, Ordering::Relaxed);
                barrier.set();
            })
        };
        barrier.wait();
        assert!(barrier.is_set());
        assert_eq!(value.load(Ordering::Relaxed), 7);
        worker.join().unwrap();
    }
}
