//! Post-completion checks on a finished bugreport archive.
//!
//! [`validate_archive`] opens the archive, resolves the main text through the
//! pointer entry, parses its sections and evaluates a [`ValidationProfile`].
//! Structural breakage (unreadable zip, missing or malformed pointer) is an
//! error.  Threshold misses are not: each one is a failed [`CheckResult`] in
//! the returned [`ValidationReport`].
//!
//! | Check | Smoke threshold |
//! |---|---|
//! | archive size (inclusive) | 3 MB ..= 30 MB |
//! | main entry (exclusive) | 1 MB .. 50 MB |
//! | `dumpstate_board.bin` | 1 MB .. 80 MB |
//! | `dumpstate_board.txt`, `proto/activity.proto` | 100 KB .. 1 MB |
//! | `FS/...` spot checks | 0 .. 100 KB |
//! | `CRITICAL` / `HIGH` / normal sections | ≥ 3 / ≥ 2 / ≥ 50 |
//! | generation time (inclusive) | 30 s ..= 150 s |

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{
    fs_entry_name, ArchiveError, ArchiveReader, ACTIVITY_PROTO_ENTRY, BOARD_BIN_ENTRY,
    BOARD_TXT_ENTRY, VERSION_ENTRY,
};
use crate::config::{load_toml, ConfigError};
use crate::sections::{count_matching, find_section, parse_bytes, Section};

const MB: u64 = 1_000_000;
const KB: u64 = 1_000;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Profile error: {0}")]
    Profile(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Profile ───────────────────────────────────────────────────────────────────

/// A `[min, max]` byte or second range.  Whether the ends are inclusive
/// depends on the check using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBounds {
    pub min: u64,
    pub max: u64,
}

impl SizeBounds {
    pub const fn new(min: u64, max: u64) -> Self { Self { min, max } }

    pub const fn unbounded() -> Self { Self { min: 0, max: u64::MAX } }

    pub fn contains_inclusive(&self, v: u64) -> bool { v >= self.min && v <= self.max }

    pub fn contains_exclusive(&self, v: u64) -> bool { v > self.min && v < self.max }
}

/// An archive entry that must exist with a size strictly inside `bounds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRule {
    pub name:   String,
    pub bounds: SizeBounds,
}

/// A section that must exist with at least `min_bytes` of body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRule {
    pub name:      String,
    pub min_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationProfile {
    /// Inclusive.
    pub archive_bytes:    SizeBounds,
    /// Exclusive.
    pub main_entry_bytes: SizeBounds,
    pub expected_version: Option<String>,
    pub entries:          Vec<EntryRule>,
    pub min_critical:     usize,
    pub min_high:         usize,
    pub min_normal:       usize,
    pub sections:         Vec<SectionRule>,
    /// Inclusive, in seconds.  Only checked when a duration is supplied.
    pub duration_secs:    Option<SizeBounds>,
}

impl Default for ValidationProfile {
    /// Structure only: any archive with a resolvable, non-empty main entry
    /// passes.
    fn default() -> Self {
        Self {
            archive_bytes:    SizeBounds::unbounded(),
            main_entry_bytes: SizeBounds::unbounded(),
            expected_version: None,
            entries:          Vec::new(),
            min_critical:     0,
            min_high:         0,
            min_normal:       0,
            sections:         Vec::new(),
            duration_secs:    None,
        }
    }
}

impl ValidationProfile {
    /// Thresholds for a full, real bugreport.
    pub fn smoke() -> Self {
        let entry = |name: String, min, max| EntryRule { name, bounds: SizeBounds::new(min, max) };
        let section = |name: &str, min_bytes| SectionRule { name: name.to_owned(), min_bytes };
        Self {
            archive_bytes:    SizeBounds::new(3 * MB, 30 * MB),
            main_entry_bytes: SizeBounds::new(MB, 50 * MB),
            expected_version: None,
            entries: vec![
                entry(BOARD_BIN_ENTRY.to_owned(), MB, 80 * MB),
                entry(BOARD_TXT_ENTRY.to_owned(), 100 * KB, MB),
                entry(ACTIVITY_PROTO_ENTRY.to_owned(), 100 * KB, MB),
                entry(fs_entry_name("/proc/1/mountinfo"), 0, 100 * KB),
                entry(
                    fs_entry_name("/data/misc/profiles/cur/0/com.android.phone/primary.prof"),
                    0,
                    100 * KB,
                ),
            ],
            min_critical: 3,
            min_high:     2,
            min_normal:   50,
            sections: vec![
                section("CRITICAL SurfaceFlinger", 10_000),
                section("CRITICAL activity", 5_000),
                section("activity", 10_000),
                section("CRITICAL cpuinfo", 1_000),
                section("CRITICAL window", 20_000),
                section("HIGH connectivity", 3_000),
                section("connectivity", 5_000),
                section("HIGH meminfo", 100_000),
                section("batterystats", 1_000),
                section("wifi", 100_000),
            ],
            duration_secs: Some(SizeBounds::new(30, 150)),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ValidationError> {
        Ok(load_toml(path.as_ref())?)
    }

    pub fn with_expected_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = Some(version.into());
        self
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name:   String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self { name: name.into(), passed, detail: detail.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub archive:       String,
    pub archive_bytes: u64,
    pub main_entry:    String,
    /// BLAKE3 of the main text, hex.
    pub main_digest:   String,
    pub sections:      Vec<Section>,
    pub checks:        Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ── validate_archive ──────────────────────────────────────────────────────────

/// Validate the archive at `path`.  `elapsed` is the generation time, when
/// the caller measured one.
pub fn validate_archive<P: AsRef<Path>>(
    path:    P,
    profile: &ValidationProfile,
    elapsed: Option<Duration>,
) -> Result<ValidationReport, ValidationError> {
    let path = path.as_ref();
    let mut reader = ArchiveReader::open(path)?;
    let archive_bytes = reader.size_bytes().unwrap_or(0);
    let mut checks = Vec::new();

    checks.push(CheckResult::new(
        "archive size",
        profile.archive_bytes.contains_inclusive(archive_bytes),
        format!("{archive_bytes} bytes, expected {}..={}", profile.archive_bytes.min, profile.archive_bytes.max),
    ));

    let main_entry = reader.main_entry_name()?;
    let main_text = reader.extract_main_text()?;
    let main_len = main_text.len() as u64;
    checks.push(CheckResult::new(
        "main entry size",
        profile.main_entry_bytes.contains_exclusive(main_len),
        format!("{main_entry}: {main_len} bytes"),
    ));

    if let Some(expected) = &profile.expected_version {
        checks.push(match reader.extract_entry(VERSION_ENTRY) {
            Ok(entry) => {
                let actual = entry.text();
                CheckResult::new(
                    "version",
                    &actual == expected,
                    format!("found {actual:?}, expected {expected:?}"),
                )
            }
            Err(e) if e.is_not_found() => CheckResult::new("version", false, "version.txt missing"),
            Err(e) => return Err(e.into()),
        });
    }

    for rule in &profile.entries {
        checks.push(match reader.stat(&rule.name) {
            Ok(info) => CheckResult::new(
                format!("entry {}", rule.name),
                rule.bounds.contains_exclusive(info.uncompressed_length),
                format!(
                    "{} bytes, expected {}<..<{}",
                    info.uncompressed_length, rule.bounds.min, rule.bounds.max
                ),
            ),
            Err(e) if e.is_not_found() => {
                CheckResult::new(format!("entry {}", rule.name), false, "missing")
            }
            Err(e) => return Err(e.into()),
        });
    }
    reader.close();

    let sections = parse_bytes(&main_text);
    checks.extend(section_checks(&sections, profile));

    if let (Some(bounds), Some(elapsed)) = (profile.duration_secs, elapsed) {
        let secs = elapsed.as_secs();
        checks.push(CheckResult::new(
            "generation time",
            bounds.contains_inclusive(secs),
            format!("{:.1}s, expected {}..={}s", elapsed.as_secs_f64(), bounds.min, bounds.max),
        ));
    }

    let report = ValidationReport {
        archive: path.display().to_string(),
        archive_bytes,
        main_entry,
        main_digest: blake3::hash(&main_text).to_hex().to_string(),
        sections,
        checks,
    };
    let failed = report.failures().count();
    if failed > 0 {
        tracing::warn!(archive = %report.archive, failed, "archive failed validation");
    } else {
        tracing::info!(archive = %report.archive, checks = report.checks.len(), "archive valid");
    }
    Ok(report)
}

/// Section-count and named-section checks against an already parsed list.
pub fn section_checks(sections: &[Section], profile: &ValidationProfile) -> Vec<CheckResult> {
    let critical = count_matching(sections, "CRITICAL");
    let high     = count_matching(sections, "HIGH");
    let normal   = sections.len().saturating_sub(critical + high);

    let mut checks = vec![
        CheckResult::new(
            "critical sections",
            critical >= profile.min_critical,
            format!("{critical}, expected at least {}", profile.min_critical),
        ),
        CheckResult::new(
            "high sections",
            high >= profile.min_high,
            format!("{high}, expected at least {}", profile.min_high),
        ),
        CheckResult::new(
            "normal sections",
            normal >= profile.min_normal,
            format!("{normal} of {} total, expected at least {}", sections.len(), profile.min_normal),
        ),
    ];
    for rule in &profile.sections {
        let name = format!("section {}", rule.name);
        checks.push(match find_section(sections, &rule.name) {
            Some(s) => CheckResult::new(
                name,
                s.size_bytes >= rule.min_bytes,
                format!("{} bytes, expected at least {}", s.size_bytes, rule.min_bytes),
            ),
            None => CheckResult::new(name, false, "not found"),
        });
    }
    checks
}
