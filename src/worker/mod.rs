//! Worker pool for parallel segment evaluation.
//!
//! Workers are stateless: each one repeatedly receives a [`Request`], runs the
//! quadrature rule and answers with a [`Response`]. The scheduler talks to the
//! pool only through the [`Transport`] trait.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │    Scheduler    │
//!                     │ (segment list)  │
//!                     └────────┬────────┘
//!                  Request ↓   │   ↑ Response   (one FIFO pair per worker)
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 0  │  │ Worker 1  │  │ Worker N  │
//!         │ (thread)  │  │ (thread)  │  │ (process) │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Transports
//!
//! - **Threads** (default): typed `crossbeam-channel` pairs per worker.
//! - **Processes**: re-executions of the current binary in `--internal-worker`
//!   mode, speaking fixed-size binary frames over stdin/stdout. A collector
//!   thread per process feeds the frames into the same typed response channel,
//!   so both transports look identical to the scheduler.

mod affinity;
mod ipc;
mod pool;
mod proc;
mod signals;
mod spawn;
pub mod worker_main;

pub use affinity::cpu_order;
pub use pool::{ConnectionState, TransportKind, WorkerPool, WorkerPoolConfig};
pub use spawn::{INTERNAL_WORKER_FLAG, WorkerCommand};
pub use worker_main::{run_worker_main, serve};

use crate::protocol::{Request, Response};
use std::fmt;

/// Index of a worker inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of reading from a connection that was reported ready.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Incoming {
    /// One complete response.
    Response(Response),
    /// The worker hung up; the connection is now closed.
    Closed,
    /// Spurious wakeup, nothing to read yet.
    Pending,
}

/// A request could not be delivered; the connection is now closed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker {worker} is unreachable: {reason}")]
pub struct SendError {
    pub worker: WorkerId,
    pub reason: String,
}

/// The scheduler's view of a set of worker connections.
///
/// Connection state moves `Idle ⇄ Busy → Closed`. `send` makes a connection
/// `Busy` (or `Closed` on failure), `mark_idle` returns it to `Idle`, and a
/// hang-up observed by `receive` closes it for good.
pub trait Transport {
    fn worker_count(&self) -> usize;

    fn state(&self, worker: WorkerId) -> ConnectionState;

    fn send(&mut self, worker: WorkerId, request: Request) -> Result<(), SendError>;

    fn mark_idle(&mut self, worker: WorkerId);

    /// Block until at least one busy connection has something to read.
    ///
    /// Returns an empty list without blocking when no connection is busy.
    fn poll_ready(&mut self) -> Vec<WorkerId>;

    fn receive(&mut self, worker: WorkerId) -> Incoming;

    /// Number of connections closed because the worker went away.
    fn lost(&self) -> usize;

    /// Number of connections that are not closed.
    fn open_count(&self) -> usize {
        (0..self.worker_count())
            .filter(|&i| self.state(WorkerId(i)) != ConnectionState::Closed)
            .count()
    }

    /// Number of connections currently waiting on a response.
    fn busy_count(&self) -> usize {
        (0..self.worker_count())
            .filter(|&i| self.state(WorkerId(i)) == ConnectionState::Busy)
            .count()
    }
}
