use std::fs::File;
use std::path::Path;
use std::time::Duration;
use sysdump::archive::{ArchiveError, ReportArchiveWriter, BOARD_BIN_ENTRY, VERSION_ENTRY};
use sysdump::validate::{
    validate_archive, EntryRule, SectionRule, SizeBounds, ValidationError, ValidationProfile,
};
use tempfile::{tempdir, NamedTempFile};

const MAIN_NAME: &str = "bugreport-com.dummy.package-2024-01-01-00-00-00.txt";

fn main_text() -> String {
    let mut text = String::from("== dumpstate: 2024-01-01 00:00:00\n");
    for (name, lines) in [("CRITICAL window", 30), ("HIGH meminfo", 10), ("wifi", 5), ("wifi", 50)] {
        text.push_str(&format!("DUMP OF SERVICE {name}:\n"));
        for _ in 0..lines {
            text.push_str(&format!("{}\n", "x".repeat(99)));
        }
        text.push_str(&format!("--------- 0.1s was the duration of dumpsys {name}\n"));
    }
    text
}

fn write_archive(path: &Path) {
    let mut ar = ReportArchiveWriter::new(File::create(path).unwrap());
    ar.add_main_text(MAIN_NAME, main_text().as_bytes()).unwrap();
    ar.add_entry(VERSION_ENTRY, b"2.0").unwrap();
    ar.add_entry(BOARD_BIN_ENTRY, &[7u8; 2048]).unwrap();
    ar.finish().unwrap();
}

#[test]
fn test_structure_only_profile_passes() {
    let temp = NamedTempFile::new().unwrap();
    write_archive(temp.path());

    let report = validate_archive(temp.path(), &ValidationProfile::default(), None).unwrap();
    assert!(report.passed());
    assert_eq!(report.main_entry, MAIN_NAME);
    assert_eq!(report.sections.len(), 4);
    assert_eq!(report.main_digest, blake3::hash(main_text().as_bytes()).to_hex().to_string());
}

#[test]
fn test_threshold_misses_are_reported_not_raised() {
    let temp = NamedTempFile::new().unwrap();
    write_archive(temp.path());

    let profile = ValidationProfile {
        entries: vec![
            EntryRule { name: BOARD_BIN_ENTRY.into(), bounds: SizeBounds::new(1000, 2048) },
            EntryRule { name: "proto/activity.proto".into(), bounds: SizeBounds::new(0, 10) },
        ],
        min_critical: 1,
        min_high: 2,
        sections: vec![
            SectionRule { name: "CRITICAL window".into(), min_bytes: 2970 },
            SectionRule { name: "wifi".into(), min_bytes: 1000 },
            SectionRule { name: "CRITICAL SurfaceFlinger".into(), min_bytes: 1 },
        ],
        ..ValidationProfile::default()
    }
    .with_expected_version("3.0");

    let report = validate_archive(temp.path(), &profile, None).unwrap();
    let failed: Vec<&str> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(
        failed,
        vec![
            "version",
            // 2048 is not strictly below 2048.
            "entry dumpstate_board.bin",
            "entry proto/activity.proto",
            "high sections",
            // The first "wifi" is the small one.
            "section wifi",
            "section CRITICAL SurfaceFlinger",
        ]
    );
    assert!(!report.passed());
    assert!(report.to_json().unwrap().contains("\"section CRITICAL window\""));
}

#[test]
fn test_duration_is_checked_only_when_supplied() {
    let temp = NamedTempFile::new().unwrap();
    write_archive(temp.path());
    let profile = ValidationProfile {
        duration_secs: Some(SizeBounds::new(30, 150)),
        ..ValidationProfile::default()
    };

    let report = validate_archive(temp.path(), &profile, None).unwrap();
    assert!(report.checks.iter().all(|c| c.name != "generation time"));

    let report = validate_archive(temp.path(), &profile, Some(Duration::from_secs(5))).unwrap();
    assert!(!report.passed());

    let report = validate_archive(temp.path(), &profile, Some(Duration::from_secs(150))).unwrap();
    assert!(report.passed());
}

#[test]
fn test_smoke_profile_rejects_a_tiny_archive() {
    let temp = NamedTempFile::new().unwrap();
    write_archive(temp.path());
    let report = validate_archive(temp.path(), &ValidationProfile::smoke(), None).unwrap();
    assert!(!report.passed());
    assert!(report.failures().any(|c| c.name == "archive size"));
    assert!(report.failures().any(|c| c.name == "normal sections"));
}

#[test]
fn test_missing_pointer_aborts_validation() {
    let temp = NamedTempFile::new().unwrap();
    {
        let mut ar = ReportArchiveWriter::new(File::create(temp.path()).unwrap());
        ar.add_main_text(MAIN_NAME, main_text().as_bytes()).unwrap();
        ar.finish_without_pointer().unwrap();
    }
    let err = validate_archive(temp.path(), &ValidationProfile::default(), None).unwrap_err();
    assert!(matches!(err, ValidationError::Archive(ArchiveError::EntryNotFound { .. })));
}

#[test]
fn test_profile_loads_from_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("profile.toml");
    std::fs::write(
        &path,
        "min_critical = 3\nexpected_version = \"2.0\"\n\n[duration_secs]\nmin = 1\nmax = 2\n",
    )
    .unwrap();
    let profile = ValidationProfile::load(&path).unwrap();
    assert_eq!(profile.min_critical, 3);
    assert_eq!(profile.expected_version.as_deref(), Some("2.0"));
    assert_eq!(profile.duration_secs, Some(SizeBounds::new(1, 2)));

    assert!(matches!(
        ValidationProfile::load(dir.path().join("absent.toml")),
        Err(ValidationError::Profile(_))
    ));
}
