//! Read side of a bugreport archive.
//!
//! [`ArchiveReader`] owns the open zip handle for its whole lifetime and
//! releases it on drop, so every early return (including a failed check in
//! the middle of validation) closes the file.  Nothing here mutates the
//! archive.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::result::ZipError;
use zip::ZipArchive;

use super::{parse_pointer, ArchiveError, MAIN_ENTRY_POINTER};

// ── EntryInfo / ArchiveEntry ──────────────────────────────────────────────────

/// Metadata of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name:                String,
    pub uncompressed_length: u64,
    pub compressed_length:   u64,
    pub crc32:               u32,
}

/// An entry together with its extracted bytes.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub info:    EntryInfo,
    pub payload: Vec<u8>,
}

impl ArchiveEntry {
    pub fn name(&self) -> &str { &self.info.name }

    pub fn uncompressed_length(&self) -> u64 { self.info.uncompressed_length }

    /// Payload as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ── ArchiveReader ─────────────────────────────────────────────────────────────

pub struct ArchiveReader<R: Read + Seek = BufReader<File>> {
    path:       Option<PathBuf>,
    size_bytes: Option<u64>,
    zip:        ZipArchive<R>,
}

impl ArchiveReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let size_bytes = file.metadata()?.len();
        let zip = ZipArchive::new(BufReader::new(file))?;
        tracing::debug!(path = %path.display(), size_bytes, entries = zip.len(), "archive opened");
        Ok(Self { path: Some(path), size_bytes: Some(size_bytes), zip })
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Wrap an already-open stream (e.g. an in-memory `Cursor`).
    pub fn from_reader(reader: R) -> Result<Self, ArchiveError> {
        Ok(Self { path: None, size_bytes: None, zip: ZipArchive::new(reader)? })
    }

    /// Release the handle.  Dropping the reader has the same effect.
    pub fn close(self) {
        if let Some(path) = &self.path {
            tracing::trace!(path = %path.display(), "archive closed");
        }
    }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    /// Size of the archive file on disk, when opened from a path.
    pub fn size_bytes(&self) -> Option<u64> { self.size_bytes }

    pub fn len(&self) -> usize { self.zip.len() }

    pub fn is_empty(&self) -> bool { self.zip.len() == 0 }

    pub fn entry_names(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_owned).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    /// Metadata for every entry, in archive order.
    pub fn list(&mut self) -> Result<Vec<EntryInfo>, ArchiveError> {
        let mut out = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            let file = self.zip.by_index(i)?;
            out.push(EntryInfo {
                name:                file.name().to_owned(),
                uncompressed_length: file.size(),
                compressed_length:   file.compressed_size(),
                crc32:               file.crc32(),
            });
        }
        Ok(out)
    }

    pub fn stat(&mut self, name: &str) -> Result<EntryInfo, ArchiveError> {
        let (info, _) = self.locate(name)?;
        Ok(info)
    }

    /// Look an entry up and extract it fully into memory.
    pub fn extract_entry(&mut self, name: &str) -> Result<ArchiveEntry, ArchiveError> {
        let mut payload = Vec::new();
        let info = self.extract_entry_to(name, &mut payload)?;
        Ok(ArchiveEntry { info, payload })
    }

    /// Stream an entry into `sink`, verifying its CRC32 on the way.
    pub fn extract_entry_to<W: Write>(&mut self, name: &str, sink: &mut W) -> Result<EntryInfo, ArchiveError> {
        let (info, mut file) = self.locate(name)?;
        let mut out = CrcWriter::new(sink);
        io::copy(&mut file, &mut out)?;
        let actual = out.finalize();
        if actual != info.crc32 {
            return Err(ArchiveError::ChecksumMismatch {
                name:     info.name,
                expected: info.crc32,
                actual,
            });
        }
        tracing::trace!(entry = %info.name, bytes = info.uncompressed_length, "entry extracted");
        Ok(info)
    }

    // ── Pointer indirection ──────────────────────────────────────────────────

    /// Name of the entry holding the main text, read from the pointer entry.
    pub fn main_entry_name(&mut self) -> Result<String, ArchiveError> {
        let pointer = self.extract_entry(MAIN_ENTRY_POINTER)?;
        parse_pointer(&pointer.payload)
    }

    /// Resolve the pointer entry and extract the entry it names.
    pub fn extract_main_text(&mut self) -> Result<Vec<u8>, ArchiveError> {
        let name = self.main_entry_name()?;
        Ok(self.extract_entry(&name)?.payload)
    }

    /// Resolve the pointer entry and stream the main text into `sink`.
    pub fn extract_main_text_to<W: Write>(&mut self, sink: &mut W) -> Result<EntryInfo, ArchiveError> {
        let name = self.main_entry_name()?;
        self.extract_entry_to(&name, sink)
    }

    fn locate(&mut self, name: &str) -> Result<(EntryInfo, impl Read + '_), ArchiveError> {
        let file = match self.zip.by_name(name) {
            Ok(f) => f,
            Err(ZipError::FileNotFound) => {
                return Err(ArchiveError::EntryNotFound { name: name.to_owned() })
            }
            Err(e) => return Err(e.into()),
        };
        let info = EntryInfo {
            name:                file.name().to_owned(),
            uncompressed_length: file.size(),
            compressed_length:   file.compressed_size(),
            crc32:               file.crc32(),
        };
        Ok((info, file))
    }
}

// ── CRC-checking sink ─────────────────────────────────────────────────────────

struct CrcWriter<'w, W: Write> {
    inner:  &'w mut W,
    hasher: crc32fast::Hasher,
}

impl<'w, W: Write> CrcWriter<'w, W> {
    fn new(inner: &'w mut W) -> Self {
        Self { inner, hasher: crc32fast::Hasher::new() }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for CrcWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
