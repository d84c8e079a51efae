//! Terminal-state tracking for one in-flight report.
//!
//! An [`EventSink`] is bound to exactly one `start` call.  The worker side
//! delivers [`ReportEvent`]s (`progress*`, then one of `error`/`finished`);
//! the caller side reads the terminal state or blocks on
//! [`EventSink::wait_until_terminal`].
//!
//! # Thread safety
//! Progress lives in atomics.  The terminal outcome lives behind a mutex
//! paired with a condvar, so a waiter never misses the transition.  All
//! methods take `&self`; share the sink as `Arc<EventSink>`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::request::ErrorKind;

/// No progress has been seen yet.
const NO_PROGRESS: u32 = u32::MAX;

// ── Events ────────────────────────────────────────────────────────────────────

/// Everything a collector can tell a caller about one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportEvent {
    /// Percent complete, 0–100.  Not necessarily monotonic.
    Progress(u32),
    Error(ErrorKind),
    Finished,
}

impl ReportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportEvent::Progress(_))
    }
}

/// Terminal outcome recorded by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Finished,
    Failed(ErrorKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Finished)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Finished   => None,
            Outcome::Failed(k)  => Some(*k),
        }
    }
}

/// Result of a caller-side wait.  `TimedOut` says nothing about whether the
/// operation itself stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitOutcome {
    Finished,
    Failed(ErrorKind),
    TimedOut,
}

impl From<Outcome> for WaitOutcome {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Finished  => WaitOutcome::Finished,
            Outcome::Failed(k) => WaitOutcome::Failed(k),
        }
    }
}

// ── EventSink ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TerminalState {
    outcome:    Option<Outcome>,
    violations: u32,
}

#[derive(Debug)]
pub struct EventSink {
    name:            String,
    progress:        AtomicU32,
    progress_events: AtomicU64,
    settled:         AtomicBool,
    terminal:        Mutex<TerminalState>,
    signal:          Condvar,
    observers:       Mutex<Vec<Sender<ReportEvent>>>,
}

impl EventSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:            name.into(),
            progress:        AtomicU32::new(NO_PROGRESS),
            progress_events: AtomicU64::new(0),
            settled:         AtomicBool::new(false),
            terminal:        Mutex::new(TerminalState::default()),
            signal:          Condvar::new(),
            observers:       Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive a copy of every event delivered after this call.
    pub fn subscribe(&self) -> Receiver<ReportEvent> {
        let (tx, rx) = unbounded();
        lock(&self.observers).push(tx);
        rx
    }

    /// Dispatch a tagged event to the matching handler.
    pub fn deliver(&self, event: ReportEvent) {
        match event {
            ReportEvent::Progress(p) => self.on_progress(p),
            ReportEvent::Error(k)    => self.on_error(k),
            ReportEvent::Finished    => self.on_finished(),
        }
    }

    // ── Worker side ──────────────────────────────────────────────────────────

    /// Record the latest percent.  Never waits on the terminal lock; the
    /// observer list lock it takes is only contended by `subscribe`.
    pub fn on_progress(&self, percent: u32) {
        let percent = if percent > 100 {
            tracing::warn!(sink = %self.name, percent, "progress above 100, clamping");
            100
        } else {
            percent
        };
        if self.settled.load(Ordering::Acquire) {
            tracing::warn!(sink = %self.name, percent, "progress after terminal signal ignored");
            return;
        }
        self.progress.store(percent, Ordering::Release);
        self.progress_events.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(sink = %self.name, percent, "progress");
        self.forward(ReportEvent::Progress(percent));
    }

    pub fn on_error(&self, kind: ErrorKind) {
        if self.settle(Outcome::Failed(kind)) {
            tracing::debug!(sink = %self.name, kind = ?kind, "error");
            self.forward(ReportEvent::Error(kind));
        }
    }

    pub fn on_finished(&self) {
        if self.settle(Outcome::Finished) {
            tracing::debug!(sink = %self.name, "finished");
            self.forward(ReportEvent::Finished);
        }
    }

    /// First terminal signal wins; any later one is a protocol violation and
    /// is counted, logged and dropped.
    fn settle(&self, outcome: Outcome) -> bool {
        let mut state = lock(&self.terminal);
        if let Some(existing) = state.outcome {
            state.violations += 1;
            tracing::warn!(
                sink = %self.name,
                existing = ?existing,
                rejected = ?outcome,
                "second terminal signal ignored"
            );
            return false;
        }
        state.outcome = Some(outcome);
        self.settled.store(true, Ordering::Release);
        drop(state);
        self.signal.notify_all();
        true
    }

    fn forward(&self, event: ReportEvent) {
        lock(&self.observers).retain(|tx| tx.send(event).is_ok());
    }

    // ── Caller side ──────────────────────────────────────────────────────────

    pub fn latest_progress(&self) -> Option<u32> {
        match self.progress.load(Ordering::Acquire) {
            NO_PROGRESS => None,
            p           => Some(p),
        }
    }

    pub fn progress_count(&self) -> u64 {
        self.progress_events.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        lock(&self.terminal).outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.outcome(), Some(Outcome::Finished))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome().and_then(|o| o.error_kind())
    }

    /// Number of terminal signals dropped after the first one.
    pub fn protocol_violations(&self) -> u32 {
        lock(&self.terminal).violations
    }

    /// Block until a terminal signal arrives or `timeout` elapses.
    pub fn wait_until_terminal(&self, timeout: Duration) -> WaitOutcome {
        let guard = lock(&self.terminal);
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |s| s.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.outcome.map(WaitOutcome::from).unwrap_or(WaitOutcome::TimedOut)
    }

    /// Fixed-interval polling variant of [`wait_until_terminal`].  Checks at
    /// least once, then sleeps `interval` between checks until `timeout`.
    ///
    /// [`wait_until_terminal`]: EventSink::wait_until_terminal
    pub fn poll_until_terminal(&self, timeout: Duration, interval: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome.into();
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(interval.min(deadline - now));
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new("listener")
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
