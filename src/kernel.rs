use crate::{
    backend::DeviceStream,
    config::Config,
    graph::Node,
    plan::Frame,
    types::{NodeId, ValueId},
};
use core::fmt::Debug;
use rayon::ThreadPool;
use std::error::Error as StdError;
use thiserror::Error;

/// The compute entry point of a node.
///
/// A kernel is built once with its graph and invoked once per run from the
/// logic stream its node is assigned to. Runs of different nodes may happen
/// concurrently, so `compute` takes `&self`.
pub trait Kernel<C: Config>: Debug + Send + Sync {
    /// Read inputs from `ctx`, compute, and write every output with
    /// [`KernelContext::set_output`].
    ///
    /// # Errors
    /// Any failure aborts the whole run and is returned from
    /// [`ParallelExecutionPlan::execute`](crate::plan::ParallelExecutionPlan::execute).
    fn compute(&self, ctx: &mut KernelContext<'_, C>) -> Result<(), KernelError>;
}

/// Failure reported by a [`Kernel`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct KernelError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl KernelError {
    /// An error with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// An error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What a kernel can see and do while it runs.
pub struct KernelContext<'a, C: Config> {
    node: &'a Node<C>,
    frame: &'a Frame<C>,
    stream: &'a DeviceStream,
    thread_pool: &'a ThreadPool,
}

impl<'a, C: Config> KernelContext<'a, C> {
    pub(crate) fn new(
        node: &'a Node<C>,
        frame: &'a Frame<C>,
        stream: &'a DeviceStream,
        thread_pool: &'a ThreadPool,
    ) -> Self {
        Self {
            node,
            frame,
            stream,
            thread_pool,
        }
    }

    /// Id of the running node.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    /// Name of the running node.
    #[must_use]
    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    /// Number of inputs the node declares.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.node.inputs().len()
    }

    /// Number of outputs the node declares.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.node.outputs().len()
    }

    /// Value of the `index`-th input.
    ///
    /// # Errors
    /// If the node has no such input or the value was never written.
    pub fn input(&self, index: usize) -> Result<&'a C::Value, KernelError> {
        let id = self.input_id(index)?;
        self.frame
            .get(id)
            .ok_or_else(|| KernelError::new(format!("input {index} ({id}) has not been produced")))
    }

    /// Write the `index`-th output.
    ///
    /// # Errors
    /// If the node has no such output or it was already written in this run.
    pub fn set_output(&mut self, index: usize, value: C::Value) -> Result<(), KernelError> {
        let id = *self
            .node
            .outputs()
            .get(index)
            .ok_or_else(|| KernelError::new(format!("node has no output {index}")))?;
        self.frame
            .set(id, value)
            .map_err(|_| KernelError::new(format!("output {index} ({id}) is already set")))
    }

    /// The device stream the node is bound to.
    #[must_use]
    pub fn stream(&self) -> &'a DeviceStream {
        self.stream
    }

    /// Pool for kernel-internal parallelism.
    #[must_use]
    pub fn thread_pool(&self) -> &'a ThreadPool {
        self.thread_pool
    }

    fn input_id(&self, index: usize) -> Result<ValueId, KernelError> {
        self.node
            .inputs()
            .get(index)
            .copied()
            .ok_or_else(|| KernelError::new(format!("node has no input {index}")))
    }
}
