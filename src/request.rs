//! Report requests, bugreport modes and the error taxonomy shared by the
//! coordinator, its collectors and every [`EventSink`](crate::events::EventSink).
//!
//! Numeric values of [`BugreportMode`] and [`ErrorKind`] are wire values:
//! callers submit the mode as a raw integer and the mode is only validated
//! inside `RequestCoordinator::start`.

use std::fmt;
use std::fs::File;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── BugreportMode ─────────────────────────────────────────────────────────────

/// Kind of report the caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum BugreportMode {
    Full        = 0,
    Interactive = 1,
    Remote      = 2,
    Wear        = 3,
    Telephony   = 4,
    Wifi        = 5,
    Default     = 6,
}

impl BugreportMode {
    pub const ALL: [BugreportMode; 7] = [
        BugreportMode::Full,
        BugreportMode::Interactive,
        BugreportMode::Remote,
        BugreportMode::Wear,
        BugreportMode::Telephony,
        BugreportMode::Wifi,
        BugreportMode::Default,
    ];

    /// Resolve a raw wire value.  Returns `None` outside the known range.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.raw() == raw)
    }

    #[inline]
    pub fn raw(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            BugreportMode::Full        => "full",
            BugreportMode::Interactive => "interactive",
            BugreportMode::Remote      => "remote",
            BugreportMode::Wear        => "wear",
            BugreportMode::Telephony   => "telephony",
            BugreportMode::Wifi        => "wifi",
            BugreportMode::Default     => "default",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::ALL.iter().copied().find(|m| m.name() == s)
    }

    /// Modes whose collectors also capture a screenshot.
    pub fn takes_screenshot(self) -> bool {
        matches!(self, BugreportMode::Full | BugreportMode::Interactive)
    }
}

impl fmt::Display for BugreportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── ErrorKind ─────────────────────────────────────────────────────────────────

/// Failure classes delivered through `on_error` or returned from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Request rejected before any work started (bad mode).
    InvalidInput,
    /// Any asynchronous failure not otherwise classified.
    Unknown,
    ConsentDenied,
    ConsentTimeout,
    /// Another operation is Running; the rejected request never ran.
    AnotherReportInProgress,
}

impl ErrorKind {
    /// Wire code reported to listeners.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidInput            => 1,
            ErrorKind::Unknown                 => 2,
            ErrorKind::ConsentDenied           => 3,
            ErrorKind::ConsentTimeout          => 4,
            ErrorKind::AnotherReportInProgress => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::InvalidInput),
            2 => Some(ErrorKind::Unknown),
            3 => Some(ErrorKind::ConsentDenied),
            4 => Some(ErrorKind::ConsentTimeout),
            5 => Some(ErrorKind::AnotherReportInProgress),
            _ => None,
        }
    }

    /// Consent failures are the only kinds detected by the collector itself.
    pub fn is_consent(self) -> bool {
        matches!(self, ErrorKind::ConsentDenied | ErrorKind::ConsentTimeout)
    }

    /// Kinds reported synchronously by `start`, before any worker runs.
    pub fn is_synchronous(self) -> bool {
        matches!(self, ErrorKind::InvalidInput | ErrorKind::AnotherReportInProgress)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput            => "invalid input",
            ErrorKind::Unknown                 => "unknown error",
            ErrorKind::ConsentDenied           => "user denied consent",
            ErrorKind::ConsentTimeout          => "user consent timed out",
            ErrorKind::AnotherReportInProgress => "another report in progress",
        };
        f.write_str(s)
    }
}

// ── OperationId ───────────────────────────────────────────────────────────────

/// Identity of one accepted `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is enough to correlate log lines.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

// ── ReportRequest ─────────────────────────────────────────────────────────────

/// One submission to the coordinator.  Immutable once built; the sinks are
/// handed to the collector only through a `CollectionContext`.
#[derive(Debug)]
pub struct ReportRequest {
    caller_id:       i32,
    package_name:    String,
    bugreport_sink:  File,
    screenshot_sink: File,
    mode:            i32,
}

impl ReportRequest {
    pub fn new(
        caller_id:       i32,
        package_name:    impl Into<String>,
        bugreport_sink:  File,
        screenshot_sink: File,
        mode:            i32,
    ) -> Self {
        Self {
            caller_id,
            package_name: package_name.into(),
            bugreport_sink,
            screenshot_sink,
            mode,
        }
    }

    /// Convenience for callers that already hold a typed mode.
    pub fn with_mode(
        caller_id:       i32,
        package_name:    impl Into<String>,
        bugreport_sink:  File,
        screenshot_sink: File,
        mode:            BugreportMode,
    ) -> Self {
        Self::new(caller_id, package_name, bugreport_sink, screenshot_sink, mode.raw())
    }

    pub fn caller_id(&self) -> i32 { self.caller_id }

    pub fn package_name(&self) -> &str { &self.package_name }

    /// The mode exactly as submitted, possibly out of range.
    pub fn raw_mode(&self) -> i32 { self.mode }

    pub fn mode(&self) -> Option<BugreportMode> {
        BugreportMode::from_raw(self.mode)
    }

    pub(crate) fn sinks_mut(&mut self) -> (&mut File, &mut File) {
        (&mut self.bugreport_sink, &mut self.screenshot_sink)
    }
}
