//! Section reconstruction over the main bugreport text.
//!
//! The text is a flat stream of lines.  A section opens on a line of the
//! exact form `DUMP OF SERVICE <name>:` and closes on the next line that
//! contains `was the duration of`.  Every line strictly between the two
//! markers adds its byte length (without the `\n` terminator) to the
//! section size.
//!
//! | Situation | Result |
//! |-----------|--------|
//! | start, body, end | one [`Section`] appended in closing order |
//! | start while another section is open | the open one is discarded |
//! | end with nothing open | ignored |
//! | stream ends with a section open | the open one is dropped |
//! | same name twice | two entries, never merged |
//!
//! Parsing is a single pass over the input with no lookahead.

use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};

pub const SECTION_START_PREFIX: &[u8] = b"DUMP OF SERVICE ";
pub const SECTION_START_SUFFIX: &[u8] = b":";
pub const SECTION_END_MARKER:   &[u8] = b"was the duration of";

// ── Section ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name:       String,
    pub size_bytes: u64,
}

impl Section {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self { name: name.into(), size_bytes }
    }
}

// ── Markers ───────────────────────────────────────────────────────────────────

/// Name captured from a section-start line, if `line` is one.
///
/// The whole line must match: prefix, then any run of non-line-break bytes,
/// then a trailing colon.  The capture may be empty.
pub fn section_start_name(line: &[u8]) -> Option<&[u8]> {
    let name = line
        .strip_prefix(SECTION_START_PREFIX)?
        .strip_suffix(SECTION_START_SUFFIX)?;
    if name.iter().any(|&b| b == b'\r' || b == b'\n') {
        return None;
    }
    Some(name)
}

/// Not every line containing the marker closes a section; only the first
/// one after an open start does.
pub fn is_section_end(line: &[u8]) -> bool {
    line.windows(SECTION_END_MARKER.len()).any(|w| w == SECTION_END_MARKER)
}

// ── SectionParser ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SectionParser {
    current:       Option<String>,
    current_bytes: u64,
    sections:      Vec<Section>,
    lines:         u64,
}

impl SectionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line without its `\n` terminator.
    pub fn feed_line(&mut self, line: &[u8]) {
        self.lines += 1;
        if let Some(name) = section_start_name(line) {
            if let Some(abandoned) = self.current.take() {
                tracing::trace!(section = %abandoned, "section reopened before closing, discarded");
            }
            // An empty name still closes out whatever was open.
            self.current = (!name.is_empty()).then(|| String::from_utf8_lossy(name).into_owned());
            self.current_bytes = 0;
        } else if is_section_end(line) {
            if let Some(name) = self.current.take() {
                self.sections.push(Section { name, size_bytes: self.current_bytes });
            }
            self.current_bytes = 0;
        } else if self.current.is_some() {
            self.current_bytes += line.len() as u64;
        }
    }

    pub fn feed_str(&mut self, line: &str) {
        self.feed_line(line.as_bytes());
    }

    /// Name of the section currently open, if any.
    pub fn open_section(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Sections closed so far.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines
    }

    /// Consume the parser.  A section still open here is dropped.
    pub fn finish(self) -> Vec<Section> {
        if let Some(open) = &self.current {
            tracing::debug!(section = %open, "unterminated trailing section dropped");
        }
        self.sections
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Parse a buffered stream.  Lines are split on `\n` only, so a `\r` before
/// it counts toward the section size.
pub fn parse_reader<R: BufRead>(mut reader: R) -> io::Result<Vec<Section>> {
    let mut parser = SectionParser::new();
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        parser.feed_line(&buf);
    }
    Ok(parser.finish())
}

/// Parse an in-memory text blob.
pub fn parse_bytes(text: &[u8]) -> Vec<Section> {
    let mut parser = SectionParser::new();
    let body = text.strip_suffix(b"\n").unwrap_or(text);
    if !text.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            parser.feed_line(line);
        }
    }
    parser.finish()
}

/// Parse already-split lines.
pub fn parse_lines<I, S>(lines: I) -> Vec<Section>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = SectionParser::new();
    for line in lines {
        parser.feed_str(line.as_ref());
    }
    parser.finish()
}

// ── Queries ───────────────────────────────────────────────────────────────────

/// Number of sections whose name contains `substring`.
pub fn count_matching(sections: &[Section], substring: &str) -> usize {
    sections.iter().filter(|s| s.name.contains(substring)).count()
}

/// First section named exactly `name`.
pub fn find_section<'a>(sections: &'a [Section], name: &str) -> Option<&'a Section> {
    sections.iter().find(|s| s.name == name)
}

/// Total bytes attributed to sections.
pub fn total_bytes(sections: &[Section]) -> u64 {
    sections.iter().map(|s| s.size_bytes).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_section_sums_body_lines() {
        let out = parse_lines([
            "DUMP OF SERVICE cpuinfo:",
            "abc",
            "defg",
            "xxx was the duration of dump",
        ]);
        assert_eq!(out, vec![Section::new("cpuinfo", 7)]);
    }

    #[test]
    fn reopen_discards_previous_section() {
        let out = parse_lines([
            "DUMP OF SERVICE a:",
            "12345",
            "DUMP OF SERVICE b:",
            "xx",
            "y was the duration of z",
        ]);
        assert_eq!(out, vec![Section::new("b", 2)]);
    }

    #[test]
    fn start_pattern_must_match_whole_line() {
        assert_eq!(section_start_name(b"DUMP OF SERVICE CRITICAL window:"), Some(&b"CRITICAL window"[..]));
        assert_eq!(section_start_name(b"DUMP OF SERVICE a:b:"), Some(&b"a:b"[..]));
        assert_eq!(section_start_name(b" DUMP OF SERVICE a:"), None);
        assert_eq!(section_start_name(b"DUMP OF SERVICE a: "), None);
        assert_eq!(section_start_name(b"DUMP OF SERVICE :"), Some(&b""[..]));
        assert_eq!(section_start_name(b"DUMP OF SERVICE a:\r"), None);
    }

    #[test]
    fn empty_name_discards_open_section() {
        let out = parse_lines([
            "DUMP OF SERVICE a:",
            "xyz",
            "DUMP OF SERVICE :",
            "uncounted",
            "was the duration of",
        ]);
        assert!(out.is_empty());
    }

    #[test]
    fn lines_outside_sections_are_not_counted() {
        let out = parse_lines([
            "preamble",
            "1 was the duration of nothing",
            "DUMP OF SERVICE x:",
            "",
            "1234",
            "--------- 0.01s was the duration of dumpsys x",
            "trailer",
        ]);
        assert_eq!(out, vec![Section::new("x", 4)]);
    }

    #[test]
    fn reader_keeps_carriage_returns_in_size() {
        let text = b"DUMP OF SERVICE x:\nab\r\nwas the duration of\n";
        let out = parse_reader(&text[..]).unwrap();
        assert_eq!(out, vec![Section::new("x", 3)]);
        assert_eq!(parse_bytes(text), out);
    }

    #[test]
    fn trailing_open_section_is_dropped() {
        let mut parser = SectionParser::new();
        for line in ["DUMP OF SERVICE a:", "x", "was the duration of", "DUMP OF SERVICE b:", "yy"] {
            parser.feed_str(line);
        }
        assert_eq!(parser.open_section(), Some("b"));
        assert_eq!(parser.finish(), vec![Section::new("a", 1)]);
    }

    #[test]
    fn queries() {
        let sections = vec![
            Section::new("CRITICAL cpuinfo", 10),
            Section::new("HIGH meminfo", 20),
            Section::new("cpuinfo", 30),
            Section::new("cpuinfo", 40),
        ];
        assert_eq!(count_matching(&sections, "CRITICAL"), 1);
        assert_eq!(count_matching(&sections, "cpuinfo"), 3);
        assert_eq!(find_section(&sections, "cpuinfo").map(|s| s.size_bytes), Some(30));
        assert!(find_section(&sections, "wifi").is_none());
        assert_eq!(total_bytes(&sections), 100);
    }
}
