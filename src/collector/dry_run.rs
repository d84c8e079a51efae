//! Dry-run collector: produces a small, structurally complete bugreport
//! without touching the operating system.
//!
//! The main text is generated first (with progress), then the consent gate
//! is consulted, and only a granted consent writes anything to the caller's
//! sinks.  Body lines are exactly [`LINE_WIDTH`] bytes, so each generated
//! section parses to `lines * LINE_WIDTH` bytes.

use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CollectionContext, CollectorError, ReportCollector};
use crate::archive::{
    ReportArchiveWriter, ACTIVITY_PROTO_ENTRY, BOARD_BIN_ENTRY, BOARD_TXT_ENTRY, VERSION_ENTRY,
};
use crate::config::CoordinatorConfig;

/// Byte length of every generated body line.
pub const LINE_WIDTH: usize = 64;

/// PNG signature; the screenshot placeholder carries nothing else.
const SCREENSHOT_PLACEHOLDER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Filesystem files mirrored under `FS/`.
const MIRRORED_FILES: &[&str] = &[
    "/proc/1/mountinfo",
    "/data/misc/profiles/cur/0/com.android.phone/primary.prof",
];

// ── Consent ───────────────────────────────────────────────────────────────────

/// What the (simulated) human operator does with the consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentDecision {
    Granted,
    Denied,
    /// Nobody answers; the prompt expires after the consent timeout.
    NoResponse,
}

impl ConsentDecision {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "granted" | "grant" | "yes" => Some(ConsentDecision::Granted),
            "denied"  | "deny"  | "no"  => Some(ConsentDecision::Denied),
            "none"    | "timeout"       => Some(ConsentDecision::NoResponse),
            _                           => None,
        }
    }
}

// ── Services ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunService {
    pub name:  String,
    pub lines: usize,
}

impl DryRunService {
    pub fn new(name: impl Into<String>, lines: usize) -> Self {
        Self { name: name.into(), lines }
    }

    pub fn expected_bytes(&self) -> u64 {
        (self.lines * LINE_WIDTH) as u64
    }
}

fn default_services() -> Vec<DryRunService> {
    [
        ("CRITICAL SurfaceFlinger", 40),
        ("CRITICAL activity",       30),
        ("CRITICAL cpuinfo",        20),
        ("CRITICAL window",         40),
        ("HIGH meminfo",            60),
        ("HIGH connectivity",       20),
        ("activity",                50),
        ("connectivity",            30),
        ("batterystats",            20),
        ("wifi",                    60),
        ("package",                 20),
        ("alarm",                   10),
    ]
    .into_iter()
    .map(|(name, lines)| DryRunService::new(name, lines))
    .collect()
}

// ── DryRunCollector ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DryRunCollector {
    consent:         ConsentDecision,
    consent_timeout: Duration,
    version:         String,
    services:        Vec<DryRunService>,
    step_delay:      Duration,
}

impl DryRunCollector {
    pub fn new(consent: ConsentDecision) -> Self {
        Self::from_config(&CoordinatorConfig::default(), consent)
    }

    pub fn from_config(config: &CoordinatorConfig, consent: ConsentDecision) -> Self {
        Self {
            consent,
            consent_timeout: config.consent_timeout(),
            version:         config.version.clone(),
            services:        default_services(),
            step_delay:      Duration::ZERO,
        }
    }

    pub fn with_services(mut self, services: Vec<DryRunService>) -> Self {
        self.services = services;
        self
    }

    /// Pause between services, so a run stays observable while Running.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = timeout;
        self
    }

    pub fn services(&self) -> &[DryRunService] { &self.services }

    pub fn version(&self) -> &str { &self.version }

    /// `bugreport-<package>-<YYYY-MM-DD-HH-MM-SS>.txt`
    pub fn main_entry_name(package: &str, at: DateTime<Utc>) -> String {
        let package: String = package
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
            .collect();
        format!("bugreport-{package}-{}.txt", at.format("%Y-%m-%d-%H-%M-%S"))
    }

    /// Render the main text, calling `progress` after every service.
    pub fn render_main_text(
        &self,
        ctx_line:     &str,
        at:           DateTime<Utc>,
        mut progress: impl FnMut(u32),
    ) -> String {
        let mut out = String::new();
        let stamp = at.format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(out, "========================================================");
        let _ = writeln!(out, "== dumpstate: {stamp}");
        let _ = writeln!(out, "========================================================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Build: dry-run");
        let _ = writeln!(out, "Bugreport format version: {}", self.version);
        let _ = writeln!(out, "Dumpstate info: {ctx_line}");
        let _ = writeln!(out, "------ 0.001s was the duration of 'UPTIME' ------");
        let _ = writeln!(out);

        let total = self.services.len().max(1);
        for (i, svc) in self.services.iter().enumerate() {
            let _ = writeln!(out, "DUMP OF SERVICE {}:", svc.name);
            for n in 0..svc.lines {
                let body = format!("  {} record {n:06}", svc.name);
                let _ = writeln!(out, "{body:<width$.width$}", width = LINE_WIDTH);
            }
            let _ = writeln!(
                out,
                "--------- 0.{:03}s was the duration of dumpsys {}, ending at: {stamp}",
                svc.lines % 1000,
                svc.name,
            );
            // 0 and 100 are reported around the loop.
            progress((((i + 1) * 90) / total) as u32);
            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }
        }
        out
    }

    fn await_consent(&self) -> Result<(), CollectorError> {
        match self.consent {
            ConsentDecision::Granted    => Ok(()),
            ConsentDecision::Denied     => Err(CollectorError::ConsentDenied),
            ConsentDecision::NoResponse => {
                std::thread::sleep(self.consent_timeout);
                Err(CollectorError::ConsentTimeout(self.consent_timeout))
            }
        }
    }
}

impl Default for DryRunCollector {
    fn default() -> Self {
        Self::new(ConsentDecision::Granted)
    }
}

impl ReportCollector for DryRunCollector {
    fn collect(&self, ctx: &mut CollectionContext<'_>) -> Result<(), CollectorError> {
        let now = Utc::now();
        ctx.report_progress(0);

        let info = format!(
            "id={} caller={} package={} mode={}",
            ctx.operation(),
            ctx.caller_id(),
            ctx.package_name(),
            ctx.mode(),
        );
        let text = self.render_main_text(&info, now, |p| ctx.report_progress(p));

        self.await_consent()?;
        tracing::debug!(operation = %ctx.operation(), "consent granted, writing report");

        let main_name   = Self::main_entry_name(ctx.package_name(), now);
        let screenshot  = ctx.mode().takes_screenshot();
        let (bugreport, screenshot_sink) = ctx.sinks();

        let mut ar = ReportArchiveWriter::new(&mut *bugreport);
        ar.add_main_text(&main_name, text.as_bytes())?;
        ar.add_entry(VERSION_ENTRY, self.version.as_bytes())?;
        ar.add_entry(BOARD_BIN_ENTRY, &[0xA5; 4096])?;
        ar.add_entry(BOARD_TXT_ENTRY, b"board: dry-run\nvendor dumpstate not available\n")?;
        ar.add_entry(ACTIVITY_PROTO_ENTRY, &[0x0a, 0x02, 0x08, 0x01])?;
        for path in MIRRORED_FILES {
            ar.add_fs_file(path, format!("# mirrored {path}\n").as_bytes())?;
        }
        ar.finish()?;
        bugreport.flush()?;

        if screenshot {
            screenshot_sink.write_all(SCREENSHOT_PLACEHOLDER)?;
            screenshot_sink.flush()?;
        }

        ctx.report_progress(100);
        Ok(())
    }
}
