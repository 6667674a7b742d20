//! The adaptive scheduler.
//!
//! The scheduler owns the segment list and the running total. Each round it
//! hands unassigned segments to idle workers, blocks until some busy worker
//! answers, and then either accepts the answered segment or splits it in
//! two. A worker is refilled as soon as its answer is processed, so live
//! workers stay saturated without waiting for the next round.
//!
//! The loop ends when the list is empty (success), when every connection is
//! closed (the run fails), or when nothing is in flight while segments
//! remain (a scheduler bug, reported instead of blocking forever).

use crate::error::{QuadError, Result};
use crate::function::Integrand;
use crate::progress::{NullReporter, Progress, Reporter};
use crate::protocol::{Request, Response};
use crate::rule::Rule;
use crate::segment::{SegmentError, SegmentId, SegmentList};
use crate::worker::{
    ConnectionState, Incoming, Transport, TransportKind, WorkerCommand, WorkerId, WorkerPool,
    WorkerPoolConfig,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Default maximum absolute deviation.
pub const DEFAULT_MAX_DEVIATION: f64 = 1e-6;

/// Settings for one integration run.
#[derive(Debug, Clone)]
pub struct IntegratorConfig {
    pub workers: usize,
    /// Target absolute error over the whole domain.
    pub max_deviation: f64,
    /// Segments in the initial partition; `None` means one per worker.
    pub initial_segments: Option<usize>,
    pub rule: Rule,
    pub transport: TransportKind,
    /// Pin workers to CPUs (advisory).
    pub affinity: bool,
    /// Verify the partition after every split and accept.
    pub audit_partition: bool,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_deviation: DEFAULT_MAX_DEVIATION,
            initial_segments: None,
            rule: Rule::default(),
            transport: TransportKind::Thread,
            affinity: true,
            audit_partition: false,
        }
    }
}

impl IntegratorConfig {
    pub fn builder() -> IntegratorConfigBuilder {
        IntegratorConfigBuilder::default()
    }

    /// Size of the initial partition.
    pub fn initial_segment_count(&self) -> usize {
        self.initial_segments.unwrap_or(self.workers.max(1))
    }

    fn validate(&self, left: f64, right: f64) -> Result<()> {
        if !left.is_finite() || !right.is_finite() || !(right - left).is_finite() {
            return Err(QuadError::InvalidDomain { left, right });
        }
        if !(self.max_deviation.is_finite() && self.max_deviation > 0.0) {
            return Err(QuadError::InvalidTolerance(self.max_deviation));
        }
        if self.initial_segments == Some(0) {
            return Err(QuadError::InvalidPartition(0));
        }
        Ok(())
    }

    fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: self.workers,
            affinity: self.affinity,
            transport: self.transport,
        }
    }
}

/// Chaining builder for [`IntegratorConfig`].
#[derive(Debug, Clone, Default)]
pub struct IntegratorConfigBuilder {
    config: IntegratorConfig,
}

impl IntegratorConfigBuilder {
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn max_deviation(mut self, max_deviation: f64) -> Self {
        self.config.max_deviation = max_deviation;
        self
    }

    pub fn initial_segments(mut self, count: usize) -> Self {
        self.config.initial_segments = Some(count);
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.config.rule = rule;
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn affinity(mut self, affinity: bool) -> Self {
        self.config.affinity = affinity;
        self
    }

    pub fn audit_partition(mut self, audit: bool) -> Self {
        self.config.audit_partition = audit;
        self
    }

    pub fn build(self) -> IntegratorConfig {
        self.config
    }
}

/// Neumaier-compensated running sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    sum: f64,
    compensation: f64,
}

impl Accumulator {
    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Counters collected during one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Responses processed.
    pub evaluations: usize,
    /// Segments accepted on their error estimate.
    pub accepted: usize,
    pub splits: usize,
    /// Segments accepted because they could no longer be split.
    pub forced_accepts: usize,
    /// Segments returned to the queue after their worker was lost.
    pub reclaimed: usize,
    pub workers: usize,
    pub workers_lost: usize,
    /// Largest number of outstanding segments seen.
    pub max_outstanding: usize,
    /// Responses received, per worker.
    pub jobs: Vec<usize>,
    pub elapsed: Duration,
}

impl RunStats {
    /// Some workers were lost but the run still completed.
    pub fn degraded(&self) -> bool {
        self.workers_lost > 0
    }
}

/// A finished integration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Integration {
    pub value: f64,
    pub stats: RunStats,
}

/// The scheduling loop over one segment list and one transport.
pub struct Scheduler<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    segments: SegmentList,
    density_budget: f64,
    total: Accumulator,
    stats: RunStats,
    reporter: &'a mut dyn Reporter,
    audit: bool,
}

impl<'a, T: Transport + ?Sized> Scheduler<'a, T> {
    /// The accept threshold is `max_deviation` spread evenly over the domain.
    pub fn new(
        transport: &'a mut T,
        segments: SegmentList,
        max_deviation: f64,
        reporter: &'a mut dyn Reporter,
    ) -> Self {
        let (left, right) = segments.domain();
        let workers = transport.worker_count();
        Self {
            transport,
            density_budget: max_deviation / (right - left),
            segments,
            total: Accumulator::default(),
            stats: RunStats {
                workers,
                jobs: vec![0; workers],
                ..Default::default()
            },
            reporter,
            audit: false,
        }
    }

    /// Check the partition after every split and accept.
    pub fn audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    pub fn density_budget(&self) -> f64 {
        self.density_budget
    }

    #[instrument(level = "debug", skip_all, fields(workers = self.stats.workers))]
    pub fn run(mut self) -> Result<Integration> {
        let start = Instant::now();
        self.stats.max_outstanding = self.segments.len();

        while !self.segments.is_empty() {
            self.dispatch()?;

            if self.transport.open_count() == 0 {
                return Err(QuadError::PoolExhausted {
                    workers: self.stats.workers,
                    outstanding: self.segments.len(),
                });
            }

            let ready = self.transport.poll_ready();
            if ready.is_empty() {
                return Err(QuadError::Stalled {
                    outstanding: self.segments.len(),
                });
            }

            for worker in ready {
                self.drain(worker)?;
            }
        }

        self.stats.workers_lost = self.transport.lost();
        self.stats.elapsed = start.elapsed();
        debug!(
            evaluations = self.stats.evaluations,
            splits = self.stats.splits,
            forced_accepts = self.stats.forced_accepts,
            reclaimed = self.stats.reclaimed,
            workers_lost = self.stats.workers_lost,
            elapsed_ms = self.stats.elapsed.as_millis() as u64,
            "Integration finished"
        );

        Ok(Integration {
            value: self.total.value(),
            stats: self.stats,
        })
    }

    /// Give every idle connection an unassigned segment, if any is left.
    fn dispatch(&mut self) -> Result<()> {
        for index in 0..self.transport.worker_count() {
            let worker = WorkerId(index);
            if self.transport.state(worker) != ConnectionState::Idle {
                continue;
            }
            match self.segments.find_unassigned() {
                Some(id) => self.send_segment(worker, id)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Send `id` to `worker`; the segment is assigned only if the send succeeds.
    fn send_segment(&mut self, worker: WorkerId, id: SegmentId) -> Result<()> {
        let (left, right) = match self.segments.get(id) {
            Some(seg) => (seg.left, seg.right),
            None => return Err(SegmentError::Stale(id).into()),
        };

        match self
            .transport
            .send(worker, Request::new(left, right, self.density_budget))
        {
            Ok(()) => self.segments.assign(id, worker)?,
            Err(e) => debug!(error = %e, segment = %id, "Segment stays queued"),
        }
        Ok(())
    }

    fn drain(&mut self, worker: WorkerId) -> Result<()> {
        match self.transport.receive(worker) {
            Incoming::Pending => Ok(()),
            Incoming::Closed => {
                if let Some(id) = self.segments.find_by_owner(worker) {
                    self.segments.release(id)?;
                    self.stats.reclaimed += 1;
                    warn!(worker_id = %worker, segment = %id, "Reclaimed segment from lost worker");
                }
                Ok(())
            }
            Incoming::Response(response) => {
                let id = self.segments.find_by_owner(worker).ok_or_else(|| {
                    QuadError::Worker(format!(
                        "worker {} answered without an assigned segment",
                        worker
                    ))
                })?;
                if let Some(jobs) = self.stats.jobs.get_mut(worker.0) {
                    *jobs += 1;
                }
                self.apply(id, &response)?;
                self.report();

                self.transport.mark_idle(worker);
                if let Some(next) = self.segments.find_unassigned() {
                    self.send_segment(worker, next)?;
                }
                Ok(())
            }
        }
    }

    /// Accept or split one answered segment.
    fn apply(&mut self, id: SegmentId, response: &Response) -> Result<()> {
        self.stats.evaluations += 1;
        trace!(
            segment = %id,
            estimate = response.estimate,
            error_density = response.error_density,
            compute_us = response.computed_at.since(response.received_at).as_micros() as u64,
            "Response"
        );

        if response.error_density < self.density_budget {
            self.fold(id, response.estimate)?;
            self.stats.accepted += 1;
        } else {
            match self.segments.split(id) {
                Ok(_) => {
                    self.stats.splits += 1;
                    self.stats.max_outstanding =
                        self.stats.max_outstanding.max(self.segments.len());
                }
                Err(SegmentError::Unsplittable { left, right }) => {
                    warn!(
                        left = %left,
                        right = %right,
                        error_density = response.error_density,
                        "Accepting segment that cannot be split further"
                    );
                    self.fold(id, response.estimate)?;
                    self.stats.forced_accepts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.audit {
            self.segments.check_partition()?;
        }
        Ok(())
    }

    /// Accept `id` and add its estimate to the running total.
    fn fold(&mut self, id: SegmentId, estimate: f64) -> Result<()> {
        if !estimate.is_finite() {
            let seg = self.segments.get(id).ok_or(SegmentError::Stale(id))?;
            return Err(QuadError::NonFiniteEstimate {
                left: seg.left,
                right: seg.right,
                estimate,
            });
        }
        let contribution = self.segments.accept(id, estimate)?;
        self.total.add(contribution);
        Ok(())
    }

    fn report(&mut self) {
        let (left, right) = self.segments.domain();
        self.reporter.report(&Progress {
            covered: self.segments.accepted_width(),
            total: right - left,
            accepted: self.stats.accepted + self.stats.forced_accepts,
            outstanding: self.segments.len(),
            partial_value: self.total.value(),
        });
    }
}

/// Runs integrations with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Integrator {
    config: IntegratorConfig,
    worker_command: Option<WorkerCommand>,
}

impl Integrator {
    pub fn new(config: IntegratorConfig) -> Self {
        Self {
            config,
            worker_command: None,
        }
    }

    /// Launch process workers with `command` instead of re-running this binary.
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn integrate(&self, f: &Integrand, left: f64, right: f64) -> Result<Integration> {
        self.integrate_with_reporter(f, left, right, &mut NullReporter)
    }

    /// Integrate `f` over `[left, right]`, reporting progress to `reporter`.
    ///
    /// Equal bounds give zero without starting any worker; reversed bounds
    /// give the negated integral over `[right, left]`.
    pub fn integrate_with_reporter(
        &self,
        f: &Integrand,
        left: f64,
        right: f64,
        reporter: &mut dyn Reporter,
    ) -> Result<Integration> {
        let outcome = self.run_integration(f, left, right, reporter);
        reporter.finish();
        outcome
    }

    fn run_integration(
        &self,
        f: &Integrand,
        left: f64,
        right: f64,
        reporter: &mut dyn Reporter,
    ) -> Result<Integration> {
        self.config.validate(left, right)?;

        if left == right {
            return Ok(Integration {
                value: 0.0,
                stats: RunStats {
                    workers: self.config.workers,
                    ..Default::default()
                },
            });
        }
        let (lo, hi, sign) = if left < right {
            (left, right, 1.0)
        } else {
            (right, left, -1.0)
        };

        let mut segments = SegmentList::initialize(lo, hi, self.config.initial_segment_count())?;
        if self.config.audit_partition {
            segments = segments.with_audit();
        }

        info!(
            function = f.name(),
            left = lo,
            right = hi,
            workers = self.config.workers,
            max_deviation = self.config.max_deviation,
            rule = %self.config.rule,
            transport = %self.config.transport,
            "Starting integration"
        );

        let mut pool = self.spawn_pool(f)?;
        let outcome = Scheduler::new(&mut pool, segments, self.config.max_deviation, reporter)
            .audit(self.config.audit_partition)
            .run();
        pool.shutdown();

        let mut integration = outcome?;
        integration.value *= sign;
        if integration.stats.degraded() {
            warn!(
                lost = integration.stats.workers_lost,
                workers = integration.stats.workers,
                "Integration completed with a reduced pool"
            );
        }
        Ok(integration)
    }

    fn spawn_pool(&self, f: &Integrand) -> Result<WorkerPool> {
        let pool_config = self.config.pool_config();
        match self.config.transport {
            TransportKind::Thread => WorkerPool::spawn_threads(&pool_config, f.clone(), self.config.rule),
            TransportKind::Process => {
                let command = match &self.worker_command {
                    Some(command) => command.clone(),
                    None => WorkerCommand::for_integrand(f, self.config.rule)?,
                };
                WorkerPool::spawn_processes(&pool_config, &command)
            }
        }
    }
}

/// Integrate `f` over `[left, right]` with thread workers and default settings.
pub fn integrate(
    f: &Integrand,
    left: f64,
    right: f64,
    workers: usize,
    max_deviation: f64,
) -> Result<f64> {
    let config = IntegratorConfig::builder()
        .workers(workers)
        .max_deviation(max_deviation)
        .build();
    Ok(Integrator::new(config).integrate(f, left, right)?.value)
}
