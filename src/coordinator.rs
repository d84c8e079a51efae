//! Single-flight report coordinator.
//!
//! # Lifecycle
//!
//! ```text
//!          start (valid, not Running)
//!   Idle ─────────────────────────────▶ Running
//!    ▲                                    │ collector returns
//!    │                                    ▼
//!    └──── teardown ◀──── Finished | Failed(kind)
//! ```
//!
//! `start` validates and transitions under one lock, then dispatches a
//! worker thread and returns.  The worker runs the collector, delivers
//! exactly one terminal event to the operation's [`EventSink`], records the
//! terminal state and finally tears the service context down, which is what
//! makes [`RequestCoordinator::lookup_service`] return `None` again.
//!
//! Rejections (`InvalidInput`, `AnotherReportInProgress`) are returned from
//! `start` *and* delivered to the rejected request's sink.  They never touch
//! a running operation.  There is no cancellation: a Running operation stays
//! Running until its collector returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::collector::{CollectionContext, ReportCollector};
use crate::config::CoordinatorConfig;
use crate::events::{EventSink, Outcome, WaitOutcome};
use crate::request::{BugreportMode, ErrorKind, OperationId, ReportRequest};

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationState {
    Idle,
    Running,
    Finished,
    Failed(ErrorKind),
}

/// The live service context.  Exists only between an accepted `start` and
/// the teardown that follows its terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHandle {
    pub operation:    OperationId,
    pub caller_id:    i32,
    pub package_name: String,
    pub mode:         BugreportMode,
    pub started_at:   DateTime<Utc>,
}

/// What happened to the most recent operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub service:     ServiceHandle,
    pub outcome:     Outcome,
    pub finished_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.service.started_at).to_std().unwrap_or_default()
    }
}

/// Synchronous rejection of a `start` call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Report submission rejected: {kind}")]
pub struct SubmitError {
    pub kind: ErrorKind,
}

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    state:     OperationState,
    service:   Option<ServiceHandle>,
    last:      Option<OperationRecord>,
    completed: u64,
}

#[derive(Debug)]
struct Shared {
    inner:   Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Running → Finished | Failed.  Ignored if `handle` no longer owns the
    /// service.
    fn settle(&self, handle: &ServiceHandle, outcome: Outcome) {
        let mut inner = self.lock();
        if inner.service.as_ref().map(|s| s.operation) != Some(handle.operation) {
            tracing::warn!(operation = %handle.operation, "settle for a service that is gone");
            return;
        }
        inner.state = match outcome {
            Outcome::Finished  => OperationState::Finished,
            Outcome::Failed(k) => OperationState::Failed(k),
        };
        inner.last = Some(OperationRecord {
            service:     handle.clone(),
            outcome,
            finished_at: Utc::now(),
        });
        drop(inner);
        self.changed.notify_all();
    }

    /// Finished | Failed → Idle, destroying the service context.
    fn teardown(&self, handle: &ServiceHandle) {
        let mut inner = self.lock();
        if inner.service.as_ref().map(|s| s.operation) != Some(handle.operation) {
            return;
        }
        inner.service   = None;
        inner.state     = OperationState::Idle;
        inner.completed += 1;
        drop(inner);
        tracing::debug!(operation = %handle.operation, "service context torn down");
        self.changed.notify_all();
    }

    /// Drop any leftover service state unless an operation is Running.
    fn reset_unless_running(&self) {
        let mut inner = self.lock();
        if inner.state != OperationState::Running {
            inner.service = None;
            inner.state   = OperationState::Idle;
        }
    }
}

// ── RequestCoordinator ────────────────────────────────────────────────────────

pub struct RequestCoordinator<C: ReportCollector> {
    collector: Arc<C>,
    config:    CoordinatorConfig,
    shared:    Arc<Shared>,
}

impl<C: ReportCollector> RequestCoordinator<C> {
    pub fn new(collector: C) -> Self {
        Self::with_config(collector, CoordinatorConfig::default())
    }

    pub fn with_config(collector: C, config: CoordinatorConfig) -> Self {
        Self {
            collector: Arc::new(collector),
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state:     OperationState::Idle,
                    service:   None,
                    last:      None,
                    completed: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig { &self.config }

    pub fn collector(&self) -> &C { &self.collector }

    /// Submit a request.  Never blocks on a running operation.
    pub fn start(&self, request: ReportRequest, sink: Arc<EventSink>) -> Result<OperationId, SubmitError> {
        let Some(mode) = request.mode() else {
            tracing::warn!(
                mode = request.raw_mode(),
                caller = request.caller_id(),
                "rejecting report: invalid bugreport mode"
            );
            self.shared.reset_unless_running();
            return Err(reject(&sink, ErrorKind::InvalidInput));
        };

        let handle = {
            let mut inner = self.shared.lock();
            if inner.state == OperationState::Running {
                let running = inner.service.as_ref().map(|s| s.operation);
                drop(inner);
                tracing::warn!(
                    running = ?running,
                    caller = request.caller_id(),
                    "rejecting report: another report in progress"
                );
                return Err(reject(&sink, ErrorKind::AnotherReportInProgress));
            }
            let handle = ServiceHandle {
                operation:    OperationId::new(),
                caller_id:    request.caller_id(),
                package_name: request.package_name().to_owned(),
                mode,
                started_at:   Utc::now(),
            };
            inner.state   = OperationState::Running;
            inner.service = Some(handle.clone());
            handle
        };

        let collector     = Arc::clone(&self.collector);
        let shared        = Arc::clone(&self.shared);
        let worker_sink   = Arc::clone(&sink);
        let worker_handle = handle.clone();
        let spawned = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || run_operation(&*collector, &shared, &worker_handle, request, &worker_sink));

        if let Err(e) = spawned {
            tracing::error!(operation = %handle.operation, error = %e, "failed to spawn report worker");
            self.shared.settle(&handle, Outcome::Failed(ErrorKind::Unknown));
            self.shared.teardown(&handle);
            return Err(reject(&sink, ErrorKind::Unknown));
        }

        tracing::info!(
            operation = %handle.operation,
            caller = handle.caller_id,
            package = %handle.package_name,
            mode = %handle.mode,
            "report started"
        );
        Ok(handle.operation)
    }

    /// `start`, then block on the sink for at most `timeout`.
    pub fn start_and_wait(
        &self,
        request: ReportRequest,
        sink:    Arc<EventSink>,
        timeout: Duration,
    ) -> Result<WaitOutcome, SubmitError> {
        self.start(request, Arc::clone(&sink))?;
        Ok(sink.wait_until_terminal(timeout))
    }

    /// Caller-side wait with the configured bound and poll interval.
    pub fn wait_for(&self, sink: &EventSink) -> WaitOutcome {
        sink.poll_until_terminal(self.config.wait_timeout(), self.config.poll_interval())
    }

    // ── Observation ──────────────────────────────────────────────────────────

    pub fn state(&self) -> OperationState {
        self.shared.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == OperationState::Idle
    }

    /// The live service, if one exists.  `None` once an operation has been
    /// torn down.
    pub fn lookup_service(&self) -> Option<ServiceHandle> {
        self.shared.lock().service.clone()
    }

    pub fn last_record(&self) -> Option<OperationRecord> {
        self.shared.lock().last.clone()
    }

    /// Operations that have gone all the way back to Idle.
    pub fn completed_operations(&self) -> u64 {
        self.shared.lock().completed
    }

    /// Block until the coordinator is Idle.  Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.shared.lock();
        let (guard, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |i| i.state != OperationState::Idle)
            .unwrap_or_else(PoisonError::into_inner);
        guard.state == OperationState::Idle
    }
}

fn reject(sink: &EventSink, kind: ErrorKind) -> SubmitError {
    sink.on_error(kind);
    SubmitError { kind }
}

// ── Worker ────────────────────────────────────────────────────────────────────

fn run_operation<C: ReportCollector>(
    collector: &C,
    shared:    &Shared,
    handle:    &ServiceHandle,
    mut request: ReportRequest,
    sink:      &EventSink,
) {
    let span = tracing::info_span!("report", operation = %handle.operation);
    let _enter = span.enter();

    let result = {
        let mut ctx = CollectionContext::new(handle.operation, handle.mode, &mut request, sink);
        panic::catch_unwind(AssertUnwindSafe(|| collector.collect(&mut ctx)))
    };
    // Close the caller's sinks before anyone hears about the outcome.
    drop(request);

    let outcome = match result {
        Ok(Ok(())) => Outcome::Finished,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, kind = ?e.kind(), "collection failed");
            Outcome::Failed(e.kind())
        }
        Err(_) => {
            tracing::error!("collector panicked");
            Outcome::Failed(ErrorKind::Unknown)
        }
    };

    match outcome {
        Outcome::Finished  => sink.on_finished(),
        Outcome::Failed(k) => sink.on_error(k),
    }
    shared.settle(handle, outcome);
    tracing::info!(outcome = ?outcome, "report done");
    shared.teardown(handle);
}
