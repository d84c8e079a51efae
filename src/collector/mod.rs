//! The boundary to whatever actually gathers diagnostic data.
//!
//! The coordinator never looks inside a collection.  It hands the collector a
//! [`CollectionContext`] on a worker thread and maps the returned
//! [`CollectorError`] onto the listener-facing [`ErrorKind`].  Progress flows
//! straight through the context into the operation's `EventSink`.

use std::fs::File;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::events::EventSink;
use crate::request::{BugreportMode, ErrorKind, OperationId, ReportRequest};

pub mod dry_run;

pub use dry_run::{ConsentDecision, DryRunCollector, DryRunService};

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("User denied consent")]
    ConsentDenied,
    #[error("No consent decision within {0:?}")]
    ConsentTimeout(Duration),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

impl CollectorError {
    /// Only consent failures keep their own kind; everything else is
    /// reported to listeners as `Unknown`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::ConsentDenied      => ErrorKind::ConsentDenied,
            CollectorError::ConsentTimeout(_)  => ErrorKind::ConsentTimeout,
            _                                  => ErrorKind::Unknown,
        }
    }
}

// ── Collector trait ───────────────────────────────────────────────────────────

pub trait ReportCollector: Send + Sync + 'static {
    /// Produce the report into the request's sinks.  Runs on the worker
    /// thread; may block for as long as collection takes.
    fn collect(&self, ctx: &mut CollectionContext<'_>) -> Result<(), CollectorError>;
}

impl<C: ReportCollector + ?Sized> ReportCollector for Box<C> {
    fn collect(&self, ctx: &mut CollectionContext<'_>) -> Result<(), CollectorError> {
        (**self).collect(ctx)
    }
}

// ── CollectionContext ─────────────────────────────────────────────────────────

/// Everything a collector may touch while running one operation.
pub struct CollectionContext<'a> {
    operation: OperationId,
    mode:      BugreportMode,
    request:   &'a mut ReportRequest,
    sink:      &'a EventSink,
}

impl<'a> CollectionContext<'a> {
    pub fn new(
        operation: OperationId,
        mode:      BugreportMode,
        request:   &'a mut ReportRequest,
        sink:      &'a EventSink,
    ) -> Self {
        Self { operation, mode, request, sink }
    }

    pub fn operation(&self) -> OperationId { self.operation }

    pub fn mode(&self) -> BugreportMode { self.mode }

    pub fn caller_id(&self) -> i32 { self.request.caller_id() }

    pub fn package_name(&self) -> &str { self.request.package_name() }

    pub fn report_progress(&self, percent: u32) {
        self.sink.on_progress(percent);
    }

    pub fn bugreport_sink(&mut self) -> &mut File {
        self.request.sinks_mut().0
    }

    pub fn screenshot_sink(&mut self) -> &mut File {
        self.request.sinks_mut().1
    }

    /// Both sinks at once, for collectors that fill them together.
    pub fn sinks(&mut self) -> (&mut File, &mut File) {
        self.request.sinks_mut()
    }
}
