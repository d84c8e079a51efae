//! Bugreport archive access.
//!
//! A finished report is a zip archive with a fixed layout:
//!
//! | Entry | Content |
//! |-------|---------|
//! | `main_entry.txt` | one line: name of the entry holding the main text |
//! | `version.txt` | report format version |
//! | `dumpstate_board.bin` / `.txt` | vendor payloads |
//! | `proto/activity.proto` | structured payload |
//! | `FS/<absolute-path>` | mirrored filesystem files |
//!
//! The main text is named dynamically (it embeds a timestamp), so readers
//! always go through the pointer entry.
//!
//! ```no_run
//! use sysdump::archive::ArchiveReader;
//!
//! let mut ar = ArchiveReader::open("bugreport.zip")?;
//! let text = ar.extract_main_text()?;
//! let sections = sysdump::sections::parse_bytes(&text);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io;

use thiserror::Error;

pub mod reader;
pub mod writer;

pub use reader::{ArchiveEntry, ArchiveReader, EntryInfo};
pub use writer::ReportArchiveWriter;

// ── Fixed entry names ─────────────────────────────────────────────────────────

pub const MAIN_ENTRY_POINTER:   &str = "main_entry.txt";
pub const VERSION_ENTRY:        &str = "version.txt";
pub const BOARD_BIN_ENTRY:      &str = "dumpstate_board.bin";
pub const BOARD_TXT_ENTRY:      &str = "dumpstate_board.txt";
pub const ACTIVITY_PROTO_ENTRY: &str = "proto/activity.proto";
pub const FS_PREFIX:            &str = "FS";

/// Entry name under which a filesystem file is mirrored:
/// `/proc/1/mountinfo` → `FS/proc/1/mountinfo`.
pub fn fs_entry_name(absolute_path: &str) -> String {
    format!("{FS_PREFIX}/{}", absolute_path.trim_start_matches('/'))
}

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Entry not found: {name}")]
    EntryNotFound { name: String },
    #[error("Malformed pointer entry {MAIN_ENTRY_POINTER}: {reason}")]
    MalformedPointer { reason: String },
    #[error("Checksum mismatch in {name}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { name: String, expected: u32, actual: u32 },
    #[error("No main entry was written before finishing the archive")]
    MissingMainEntry,
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::EntryNotFound { .. })
    }
}

/// Validate the content of a pointer entry and return the target name.
///
/// One trailing `\n` is tolerated.  Empty, multi-line or non-UTF-8 content
/// is malformed.
pub fn parse_pointer(content: &[u8]) -> Result<String, ArchiveError> {
    let line = content.strip_suffix(b"\n").unwrap_or(content);
    let name = std::str::from_utf8(line).map_err(|_| ArchiveError::MalformedPointer {
        reason: "not valid UTF-8".into(),
    })?;
    if name.is_empty() {
        return Err(ArchiveError::MalformedPointer { reason: "empty".into() });
    }
    if name.contains('\n') {
        return Err(ArchiveError::MalformedPointer { reason: "more than one line".into() });
    }
    if name == MAIN_ENTRY_POINTER {
        return Err(ArchiveError::MalformedPointer { reason: "points at itself".into() });
    }
    Ok(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_names_are_rooted_under_prefix() {
        assert_eq!(fs_entry_name("/proc/1/mountinfo"), "FS/proc/1/mountinfo");
        assert_eq!(fs_entry_name("data/x"), "FS/data/x");
    }

    #[test]
    fn pointer_parsing() {
        assert_eq!(parse_pointer(b"bugreport-x.txt").unwrap(), "bugreport-x.txt");
        assert_eq!(parse_pointer(b"bugreport-x.txt\n").unwrap(), "bugreport-x.txt");
        assert!(matches!(parse_pointer(b""), Err(ArchiveError::MalformedPointer { .. })));
        assert!(matches!(parse_pointer(b"\n"), Err(ArchiveError::MalformedPointer { .. })));
        assert!(matches!(parse_pointer(b"a\nb"), Err(ArchiveError::MalformedPointer { .. })));
        assert!(matches!(parse_pointer(&[0xff, 0xfe]), Err(ArchiveError::MalformedPointer { .. })));
        assert!(matches!(parse_pointer(b"main_entry.txt"), Err(ArchiveError::MalformedPointer { .. })));
    }
}
