//! Worker pool: one connection per worker, over threads or processes.

use super::affinity;
use super::proc::Proc;
use super::spawn::{WorkerCommand, spawn_collector_thread, spawn_worker};
use super::worker_main::serve;
use super::{Incoming, SendError, Transport, WorkerId};
use crate::error::{QuadError, Result};
use crate::function::Integrand;
use crate::protocol::{Request, Response};
use crate::rule::QuadratureRule;
use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, unbounded};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Grace period for a process worker to exit after its stdin is closed.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one worker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Busy,
    Closed,
}

/// How workers are run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Thread,
    Process,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "thread" | "threads" => Ok(Self::Thread),
            "process" | "processes" => Ok(Self::Process),
            other => Err(format!(
                "Unknown transport: '{}'. Valid options: thread, process",
                other
            )),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread => write!(f, "thread"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    /// Pin worker `k` to the `k`-th CPU of [`affinity::cpu_order`].
    pub affinity: bool,
    pub transport: TransportKind,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            affinity: true,
            transport: TransportKind::Thread,
        }
    }
}

enum Link {
    Thread {
        requests: Option<Sender<Request>>,
        handle: Option<JoinHandle<()>>,
    },
    Process {
        proc: Proc,
        collector: Option<JoinHandle<()>>,
    },
}

struct Connection {
    id: WorkerId,
    state: ConnectionState,
    link: Link,
    responses: Receiver<Response>,
}

impl Connection {
    fn deliver(&mut self, request: Request) -> std::result::Result<(), String> {
        match &mut self.link {
            Link::Thread {
                requests: Some(tx), ..
            } => tx
                .send(request)
                .map_err(|_| "worker thread has exited".to_string()),
            Link::Thread { requests: None, .. } => Err("connection already closed".to_string()),
            Link::Process { proc, .. } => proc.send(&request).map_err(|e| e.to_string()),
        }
    }

    /// Close the request side; the worker winds down on its own.
    fn hang_up(&mut self) {
        self.state = ConnectionState::Closed;
        match &mut self.link {
            Link::Thread { requests, .. } => *requests = None,
            Link::Process { proc, .. } => proc.close_input(),
        }
    }

    /// Describe why the worker went away, for the loss diagnostic.
    fn loss_reason(&mut self) -> String {
        match &mut self.link {
            Link::Thread { .. } => "worker thread exited".to_string(),
            Link::Process { proc, .. } => match proc.try_wait() {
                Ok(Some(reason)) => reason.to_string(),
                Ok(None) => "closed its output".to_string(),
                Err(e) => e.to_string(),
            },
        }
    }

    fn stop(&mut self) {
        self.hang_up();
        match &mut self.link {
            Link::Thread { handle, .. } => {
                if let Some(handle) = handle.take()
                    && handle.join().is_err()
                {
                    debug!(worker_id = %self.id, "Worker thread panicked");
                }
            }
            Link::Process { proc, collector } => {
                if let Err(e) = proc.stop(STOP_TIMEOUT) {
                    debug!(worker_id = %self.id, error = %e, "Failed to stop worker process");
                }
                if let Some(handle) = collector.take() {
                    let _ = handle.join();
                }
            }
        }
    }
}

/// A fixed set of workers, addressed by [`WorkerId`].
///
/// Workers are never respawned: a lost connection stays closed until the
/// pool is dropped.
pub struct WorkerPool {
    connections: Vec<Connection>,
    lost: usize,
    shut_down: bool,
}

impl WorkerPool {
    /// Start `config.worker_count` thread workers evaluating `f` with `rule`.
    pub fn spawn_threads<R>(config: &WorkerPoolConfig, f: Integrand, rule: R) -> Result<Self>
    where
        R: QuadratureRule + 'static,
    {
        info!(
            workers = config.worker_count,
            function = f.name(),
            rule = rule.name(),
            "Starting thread workers"
        );
        Self::spawn_thread_workers(
            config.worker_count,
            config.affinity,
            move |_id, mut requests, mut responses| {
                let _ = serve(&mut requests, &mut responses, &f, &rule);
            },
        )
    }

    /// Start `count` threads running a caller-provided worker body.
    ///
    /// The body owns its request receiver and response sender; returning
    /// from it closes the connection.
    pub fn with_worker_fn<F>(count: usize, body: F) -> Result<Self>
    where
        F: Fn(WorkerId, Receiver<Request>, Sender<Response>) + Send + Sync + 'static,
    {
        Self::spawn_thread_workers(count, false, body)
    }

    fn spawn_thread_workers<F>(count: usize, pin: bool, body: F) -> Result<Self>
    where
        F: Fn(WorkerId, Receiver<Request>, Sender<Response>) + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let order = if pin { affinity::cpu_order() } else { Vec::new() };
        let mut connections = Vec::with_capacity(count);

        for index in 0..count {
            let id = WorkerId(index);
            let (req_tx, req_rx) = unbounded();
            let (resp_tx, resp_rx) = unbounded();
            let body = Arc::clone(&body);
            let order = order.clone();

            let handle = std::thread::Builder::new()
                .name(format!("quad-worker-{}", id))
                .spawn(move || {
                    affinity::hint(&order, index, None);
                    body(id, req_rx, resp_tx);
                })
                .map_err(|e| QuadError::Spawn {
                    worker: id,
                    reason: e.to_string(),
                })?;

            connections.push(Connection {
                id,
                state: ConnectionState::Idle,
                link: Link::Thread {
                    requests: Some(req_tx),
                    handle: Some(handle),
                },
                responses: resp_rx,
            });
        }

        Ok(Self::from_connections(connections))
    }

    /// Start `config.worker_count` worker processes from `command`.
    pub fn spawn_processes(config: &WorkerPoolConfig, command: &WorkerCommand) -> Result<Self> {
        info!(workers = config.worker_count, "Starting process workers");
        let order = if config.affinity {
            affinity::cpu_order()
        } else {
            Vec::new()
        };
        let mut connections = Vec::with_capacity(config.worker_count);

        for index in 0..config.worker_count {
            let id = WorkerId(index);
            let mut proc = spawn_worker(command, id)?;
            affinity::hint(&order, index, Some(proc.pid()));

            let mut reader = proc
                .take_reader()
                .ok_or_else(|| QuadError::Worker(format!("Worker {} has no output pipe", id)))?;
            let (resp_tx, resp_rx) = unbounded();
            let collector = spawn_collector_thread(id, move || {
                loop {
                    match reader.read_response() {
                        Ok(Some(response)) => {
                            if resp_tx.send(response).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(worker_id = %id, error = %e, "Malformed frame from worker");
                            break;
                        }
                    }
                }
            })?;

            debug!(worker_id = %id, pid = %proc.pid(), "Spawned worker process");
            connections.push(Connection {
                id,
                state: ConnectionState::Idle,
                link: Link::Process {
                    proc,
                    collector: Some(collector),
                },
                responses: resp_rx,
            });
        }

        Ok(Self::from_connections(connections))
    }

    fn from_connections(connections: Vec<Connection>) -> Self {
        Self {
            connections,
            lost: 0,
            shut_down: false,
        }
    }

    /// Stop every worker and wait for it. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for conn in &mut self.connections {
            conn.stop();
        }
        debug!(workers = self.connections.len(), "Worker pool shut down");
    }

    fn close_lost(&mut self, worker: WorkerId, reason: &str) {
        let conn = &mut self.connections[worker.0];
        if conn.state == ConnectionState::Closed {
            return;
        }
        conn.hang_up();
        self.lost += 1;
        warn!(worker_id = %worker, reason, "Lost worker");
    }
}

impl Transport for WorkerPool {
    fn worker_count(&self) -> usize {
        self.connections.len()
    }

    fn state(&self, worker: WorkerId) -> ConnectionState {
        self.connections[worker.0].state
    }

    fn send(&mut self, worker: WorkerId, request: Request) -> std::result::Result<(), SendError> {
        let conn = &mut self.connections[worker.0];
        let outcome = if conn.state == ConnectionState::Closed {
            Err("connection already closed".to_string())
        } else {
            conn.deliver(request)
        };

        match outcome {
            Ok(()) => {
                conn.state = ConnectionState::Busy;
                trace!(worker_id = %worker, left = request.left, right = request.right, "Sent request");
                Ok(())
            }
            Err(reason) => {
                self.close_lost(worker, &reason);
                Err(SendError { worker, reason })
            }
        }
    }

    fn mark_idle(&mut self, worker: WorkerId) {
        let conn = &mut self.connections[worker.0];
        if conn.state == ConnectionState::Busy {
            conn.state = ConnectionState::Idle;
        }
    }

    fn poll_ready(&mut self) -> Vec<WorkerId> {
        let busy: Vec<&Connection> = self
            .connections
            .iter()
            .filter(|c| c.state == ConnectionState::Busy)
            .collect();
        if busy.is_empty() {
            return Vec::new();
        }

        let mut select = Select::new();
        for conn in &busy {
            select.recv(&conn.responses);
        }
        let first = select.ready();

        let mut ready: Vec<WorkerId> = busy
            .iter()
            .enumerate()
            .filter(|(i, conn)| *i == first || !conn.responses.is_empty())
            .map(|(_, conn)| conn.id)
            .collect();
        ready.sort_unstable();
        ready
    }

    fn receive(&mut self, worker: WorkerId) -> Incoming {
        let conn = &mut self.connections[worker.0];
        if conn.state == ConnectionState::Closed {
            return Incoming::Closed;
        }
        match conn.responses.try_recv() {
            Ok(response) => Incoming::Response(response),
            Err(TryRecvError::Empty) => Incoming::Pending,
            Err(TryRecvError::Disconnected) => {
                let reason = conn.loss_reason();
                self.close_lost(worker, &reason);
                Incoming::Closed
            }
        }
    }

    fn lost(&self) -> usize {
        self.lost
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
