//! Write side: builds archives with the fixed bugreport layout.
//!
//! ```no_run
//! use sysdump::archive::ReportArchiveWriter;
//!
//! let file = std::fs::File::create("bugreport.zip")?;
//! let mut ar = ReportArchiveWriter::new(file);
//! ar.add_main_text("bugreport-demo-2024-01-01-00-00-00.txt", b"...")?;
//! ar.add_entry("version.txt", b"2.0")?;
//! ar.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{Seek, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{fs_entry_name, ArchiveError, MAIN_ENTRY_POINTER};

pub struct ReportArchiveWriter<W: Write + Seek> {
    zip:        ZipWriter<W>,
    options:    SimpleFileOptions,
    main_entry: Option<String>,
    entries:    Vec<String>,
    bytes_in:   u64,
}

impl<W: Write + Seek> ReportArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_compression(inner, CompressionMethod::Deflated)
    }

    pub fn with_compression(inner: W, method: CompressionMethod) -> Self {
        Self {
            zip:        ZipWriter::new(inner),
            options:    SimpleFileOptions::default()
                .compression_method(method)
                .unix_permissions(0o644),
            main_entry: None,
            entries:    Vec::new(),
            bytes_in:   0,
        }
    }

    pub fn add_entry(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        self.zip.start_file(name, self.options)?;
        self.zip.write_all(data)?;
        self.entries.push(name.to_owned());
        self.bytes_in += data.len() as u64;
        Ok(())
    }

    /// Mirror a filesystem file under `FS/`.
    pub fn add_fs_file(&mut self, absolute_path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        self.add_entry(&fs_entry_name(absolute_path), data)
    }

    /// Add the main text and remember its name for the pointer entry.
    /// Calling this twice repoints the pointer at the later entry.
    pub fn add_main_text(&mut self, name: &str, text: &[u8]) -> Result<(), ArchiveError> {
        self.add_entry(name, text)?;
        self.main_entry = Some(name.to_owned());
        Ok(())
    }

    pub fn entries(&self) -> &[String] { &self.entries }

    /// Uncompressed bytes written so far.
    pub fn bytes_in(&self) -> u64 { self.bytes_in }

    /// Write the pointer entry and the central directory.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        let main = self.main_entry.take().ok_or(ArchiveError::MissingMainEntry)?;
        self.add_entry(MAIN_ENTRY_POINTER, main.as_bytes())?;
        tracing::debug!(
            main_entry = %main,
            entries = self.entries.len(),
            bytes_in = self.bytes_in,
            "archive finished"
        );
        Ok(self.zip.finish()?)
    }

    /// Finish without a pointer entry.  Produces an archive readers treat as
    /// malformed; useful for exercising that path.
    pub fn finish_without_pointer(self) -> Result<W, ArchiveError> {
        Ok(self.zip.finish()?)
    }
}
