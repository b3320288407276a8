//! JAR manifest generation.
//!
//! The manifest byte form is not reproducible from its logical state alone
//! (attribute order is not fixed across tools), so the extension keeps a
//! cached serialization seeded from the original on-disk bytes and
//! invalidates it only when an attribute actually changes. A stable byte
//! stream is what keeps no-op builds from re-signing.

use droidzip_archive::{ZFile, ZFileExtension};
use droidzip_core::cache::CachedBytes;
use droidzip_core::error::{DroidZipError, Result};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

/// Archive entry name of the JAR manifest.
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

/// The only manifest version this engine understands.
pub const MANIFEST_VERSION: &str = "1.0";

const VERSION_ATTRIBUTE: &str = "Manifest-Version";

/// Maximum manifest line length in bytes, excluding the CRLF terminator.
/// Longer logical lines continue on the next line after a single space.
const MAX_LINE_LEN: usize = 72;

/// A JAR manifest: ordered main attributes plus any named sections, the
/// latter preserved verbatim.
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    main: Vec<(String, String)>,
    /// Everything after the main section's terminating blank line, byte for
    /// byte. Per-entry sections are not interpreted by this engine.
    tail: Vec<u8>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest bytes: the main attribute section up to the first
    /// blank line, with continuation lines folded, and the rest verbatim.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut main: Vec<(String, String)> = Vec::new();
        let mut pos = 0usize;

        loop {
            let (line, next) = read_line(bytes, pos);
            pos = next;
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix(b" ".as_slice()) {
                // Continuation of the previous attribute value.
                let Some(last) = main.last_mut() else {
                    return Err(DroidZipError::invalid_header(
                        "manifest continuation line before any attribute",
                    ));
                };
                last.1.push_str(str_of(rest)?);
                continue;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| DroidZipError::invalid_header("manifest line without ':'"))?;
            let name = str_of(&line[..colon])?.to_string();
            let value = &line[colon + 1..];
            let value = str_of(value.strip_prefix(b" ".as_slice()).unwrap_or(value))?.to_string();
            main.push((name, value));
            if pos >= bytes.len() {
                break;
            }
        }

        Ok(Self {
            main,
            tail: bytes.get(pos..).unwrap_or_default().to_vec(),
        })
    }

    /// Get a main attribute value. Attribute names compare case-insensitively.
    pub fn main_attribute(&self, name: &str) -> Option<&str> {
        self.main
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a main attribute, keeping existing attribute order. Returns
    /// whether the stored value actually changed.
    pub fn set_main_attribute(&mut self, name: &str, value: &str) -> bool {
        if let Some(entry) = self
            .main
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            if entry.1 == value {
                return false;
            }
            entry.1 = value.to_string();
        } else {
            self.main.push((name.to_string(), value.to_string()));
        }
        true
    }

    /// Serialize to the JAR manifest text format: CRLF line endings, lines
    /// wrapped at 72 bytes with space-prefixed continuations, main section
    /// terminated by a blank line, named sections appended verbatim.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.main {
            write_wrapped(&mut out, format!("{name}: {value}").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.tail);
        out
    }
}

/// Read one line starting at `pos`, accepting CRLF or bare LF. Returns the
/// line without its terminator and the position after it.
fn read_line(bytes: &[u8], pos: usize) -> (&[u8], usize) {
    let rest = bytes.get(pos..).unwrap_or_default();
    match rest.iter().position(|&b| b == b'\n') {
        Some(nl) => {
            let line = &rest[..nl];
            let line = line.strip_suffix(b"\r".as_slice()).unwrap_or(line);
            (line, pos + nl + 1)
        }
        None => (rest, bytes.len()),
    }
}

fn str_of(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|_| DroidZipError::encoding("manifest line is not valid UTF-8"))
}

fn write_wrapped(out: &mut Vec<u8>, line: &[u8]) {
    let mut rest = line;
    let mut first = true;
    loop {
        let limit = if first { MAX_LINE_LEN } else { MAX_LINE_LEN - 1 };
        if !first {
            out.push(b' ');
        }
        let take = rest.len().min(limit);
        out.extend_from_slice(&rest[..take]);
        out.extend_from_slice(b"\r\n");
        rest = &rest[take..];
        first = false;
        if rest.is_empty() {
            break;
        }
    }
}

/// Keeps the archive's `META-INF/MANIFEST.MF` entry present and current.
pub struct ManifestGenerationExtension {
    built_by: String,
    created_by: String,
    manifest: RefCell<Manifest>,
    cached: RefCell<CachedBytes>,
    dirty: Cell<bool>,
}

impl ManifestGenerationExtension {
    /// Create an extension that stamps the given `Built-By` and
    /// `Created-By` main attributes.
    pub fn new(built_by: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            built_by: built_by.into(),
            created_by: created_by.into(),
            manifest: RefCell::new(Manifest::new()),
            cached: RefCell::new(CachedBytes::new()),
            dirty: Cell::new(false),
        }
    }

    /// Bind to an archive: load and validate any existing manifest, stamp
    /// the identity attributes, and subscribe to the update cycle.
    ///
    /// An existing manifest whose `Manifest-Version` is not the supported
    /// constant is a fatal parse error, never auto-upgraded.
    pub fn register(self: Rc<Self>, zfile: &mut ZFile) -> Result<()> {
        if let Some(entry) = zfile.get(MANIFEST_NAME) {
            let original = entry.read()?;
            *self.manifest.borrow_mut() = Manifest::parse(&original)?;
            // The original bytes seed the cache; re-serializing would not
            // reproduce them and would force a spurious rewrite.
            self.cached.borrow_mut().set(original);

            match self.manifest.borrow().main_attribute(VERSION_ATTRIBUTE) {
                Some(version) if version == MANIFEST_VERSION => {}
                Some(version) => {
                    return Err(DroidZipError::ManifestVersion {
                        found: version.to_string(),
                    });
                }
                None => {
                    return Err(DroidZipError::invalid_header(
                        "existing manifest has no Manifest-Version attribute",
                    ));
                }
            }
        } else {
            self.set_attribute(VERSION_ATTRIBUTE, MANIFEST_VERSION);
        }

        let built_by = self.built_by.clone();
        let created_by = self.created_by.clone();
        self.set_attribute("Built-By", &built_by);
        self.set_attribute("Created-By", &created_by);

        zfile.add_extension(self)
    }

    /// The single mutation funnel: any attribute change invalidates the
    /// cached bytes and marks the extension dirty.
    fn set_attribute(&self, name: &str, value: &str) {
        if self.manifest.borrow_mut().set_main_attribute(name, value) {
            self.cached.borrow_mut().reset();
            self.dirty.set(true);
            debug!(attribute = name, "manifest attribute changed");
        }
    }

    /// Current manifest bytes, serialized at most once per invalidation.
    pub fn manifest_bytes(&self) -> Vec<u8> {
        let mut cached = self.cached.borrow_mut();
        if let Some(bytes) = cached.get() {
            return bytes.to_vec();
        }
        let bytes = self.manifest.borrow().to_bytes();
        cached.set(bytes.clone());
        bytes
    }
}

impl ZFileExtension for ManifestGenerationExtension {
    fn before_update(&self, zfile: &mut ZFile) -> Result<()> {
        if !self.dirty.get() {
            return Ok(());
        }
        let bytes = self.manifest_bytes();
        zfile.add(MANIFEST_NAME, &bytes, true)?;
        self.dirty.set(false);
        debug!("manifest entry staged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let text = b"Manifest-Version: 1.0\r\nBuilt-By: Generated-by-ADT\r\n\r\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.main_attribute("Manifest-Version"), Some("1.0"));
        assert_eq!(manifest.main_attribute("manifest-version"), Some("1.0"));
        assert_eq!(manifest.main_attribute("Built-By"), Some("Generated-by-ADT"));
        assert_eq!(manifest.main_attribute("Missing"), None);
    }

    #[test]
    fn test_parse_folds_continuation_lines() {
        let text = b"Manifest-Version: 1.0\r\nLong-Attribute: abc\r\n def\r\n\r\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.main_attribute("Long-Attribute"), Some("abcdef"));
    }

    #[test]
    fn test_parse_preserves_named_sections() {
        let text =
            b"Manifest-Version: 1.0\r\n\r\nName: a.txt\r\nSHA-256-Digest: xxxx\r\n\r\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(
            manifest.tail,
            b"Name: a.txt\r\nSHA-256-Digest: xxxx\r\n\r\n"
        );
        assert_eq!(manifest.to_bytes(), text);
    }

    #[test]
    fn test_serialize_wraps_long_lines() {
        let mut manifest = Manifest::new();
        let long = "x".repeat(100);
        manifest.set_main_attribute("Attr", &long);
        let bytes = manifest.to_bytes();
        for line in bytes.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r".as_slice()).unwrap_or(line);
            assert!(line.len() <= MAX_LINE_LEN);
        }
        // Folding the continuation back recovers the value.
        let reparsed = Manifest::parse(&bytes).unwrap();
        assert_eq!(reparsed.main_attribute("Attr"), Some(long.as_str()));
    }

    #[test]
    fn test_set_attribute_reports_change() {
        let mut manifest = Manifest::new();
        assert!(manifest.set_main_attribute("A", "1"));
        assert!(!manifest.set_main_attribute("A", "1"));
        assert!(manifest.set_main_attribute("A", "2"));
    }

    #[test]
    fn test_lf_only_input_accepted() {
        let manifest = Manifest::parse(b"Manifest-Version: 1.0\nBuilt-By: x\n\n").unwrap();
        assert_eq!(manifest.main_attribute("Built-By"), Some("x"));
    }
}
