//! Multi-stream execution scheduler for computation graphs whose nodes run on
//! heterogeneous backends.
//!
//! A [`ParallelExecutionPlan`](plan::ParallelExecutionPlan) is built once per
//! graph. It:
//! - Partitions the topologically ordered nodes into a fixed number of logic
//!   streams through a replaceable [`PartitionPolicy`](plan::PartitionPolicy)
//!   (round-robin by default).
//! - Allocates one notification per node that has a consumer in another
//!   logic stream; all foreign consumers wait on that same notification.
//! - Binds every logic stream to one device stream per backend its nodes use,
//!   created through a [`StreamHandlerRegistry`](backend::StreamHandlerRegistry).
//! - Compiles each logic stream into an ordered list of wait / execute /
//!   signal [`Command`](plan::Command)s.
//!
//! Each run then allocates fresh notification handles, dispatches all but
//! the last logic stream to a thread pool, runs the last one on the calling
//! thread, and joins on one-shot barriers before reading the fetched values.
//!
//! Key modules:
//! - `config`: binds value and kernel types via the `Config` trait and holds
//!   `PlanOptions`.
//! - `backend`: backend identifiers, the `StreamHandler` interface, the
//!   registry, and a host (CPU) implementation.
//! - `graph`: graph declaration, validation and topological ordering.
//! - `kernel`: the `Kernel` interface and the context kernels run with.
//! - `plan`: schedule construction and concurrent execution.
//!
//! Quick start:
//! 1. Implement `Config` and `Kernel` for your value and operator types.
//! 2. Register a `StreamHandler` for every backend in a
//!    `StreamHandlerRegistry` once, at startup.
//! 3. Declare nodes with `Graph::builder()`, build the plan with
//!    `ParallelExecutionPlan::new`, then call `execute` as often as needed.

/// Execution backends and their stream primitives.
///
/// Defines `BackendType`, the opaque stream and notification handles, the
/// per-backend `StreamHandler` interface, the owning `DeviceStream`, the
/// `StreamHandlerRegistry`, and `HostStreamHandler` for host execution.
pub mod backend;
/// Public interface to configure plans.
///
/// The `Config` trait binds the value and kernel types; `PlanOptions` holds
/// the stream count, pool sizes and partition policy.
pub mod config;
/// Errors reported while building and executing plans.
pub mod error;
/// Computation graph declaration.
///
/// `GraphBuilder` collects nodes and values; `build` derives the
/// producer/consumer edges and a stable topological order.
pub mod graph;
/// The `Kernel` interface and the `KernelContext` kernels run with.
pub mod kernel;
/// Schedule construction and concurrent execution.
pub mod plan;
mod sync;
/// Identifiers shared across the crate.
pub mod types;
