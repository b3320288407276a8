//! The archive core.
//!
//! A [`ZFile`] owns the single on-disk representation of one archive: the
//! authoritative name-to-entry index, entry placement and free space, the
//! central directory, and the registered extensions. Entries are mutated in
//! memory; [`ZFile::update`] performs the full write cycle.
//!
//! The update cycle fires extension hooks in a fixed order: `before_update`
//! for every extension (which may itself add or delete entries), then all
//! pending entry bytes and the rebuilt central directory and EOCD are
//! written, then `entries_written` fires. If an `entries_written` hook
//! dirties the archive again (signing block insertion shifts the central
//! directory), the write pass re-runs until the layout settles.

use crate::entry::StoredEntry;
use crate::extension::ZFileExtension;
use crate::records::{
    CentralDirectoryHeader, CompressionInfo, CompressionMethod, Eocd, MAX_COMMENT_LEN,
    MIN_EOCD_SIZE, check_u32, encode_name,
};
use droidzip_core::error::{DroidZipError, Result};
use droidzip_core::source::{FileRegionSource, SharedFile};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Alignment policy for stored (uncompressed) entry data, `zipalign` style.
#[derive(Debug, Clone)]
pub struct AlignmentRule {
    default_alignment: u32,
    overrides: Vec<(String, u32)>,
}

impl AlignmentRule {
    /// Align all stored entries' data to `default_alignment` bytes.
    pub fn new(default_alignment: u32) -> Self {
        Self {
            default_alignment,
            overrides: Vec::new(),
        }
    }

    /// Use `alignment` instead for entry names ending in `suffix`.
    pub fn with_suffix(mut self, suffix: impl Into<String>, alignment: u32) -> Self {
        self.overrides.push((suffix.into(), alignment));
        self
    }

    /// Alignment required for the named entry.
    pub fn alignment_for(&self, name: &str) -> u32 {
        self.overrides
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix.as_str()))
            .map(|(_, a)| *a)
            .unwrap_or(self.default_alignment)
            .max(1)
    }
}

/// Options controlling archive behavior.
#[derive(Debug, Clone)]
pub struct ZFileOptions {
    /// Alignment policy for stored entry data; `None` disables alignment.
    pub alignment: Option<AlignmentRule>,
    /// Skip timestamp fields when verifying local headers against the
    /// central directory.
    pub ignore_timestamps: bool,
    /// DEFLATE level for newly added entries (0-9).
    pub compression_level: u32,
}

impl Default for ZFileOptions {
    fn default() -> Self {
        Self {
            alignment: None,
            ignore_timestamps: false,
            compression_level: 6,
        }
    }
}

/// The incremental zip archive.
pub struct ZFile {
    file: SharedFile,
    path: PathBuf,
    options: ZFileOptions,
    entries: BTreeMap<String, StoredEntry>,
    extensions: Vec<Rc<dyn ZFileExtension>>,
    dirty: bool,
    entries_end: u64,
    extra_directory_offset: u64,
    cd_offset: u64,
    cd_size: u64,
    eocd_comment: Vec<u8>,
    closed: bool,
}

impl ZFile {
    /// Open an archive at `path`, creating an empty one if the file does not
    /// exist or is empty.
    ///
    /// Existing archives are fully parsed and every entry's local header is
    /// verified against the central directory. Any structural inconsistency
    /// is fatal; the archive must not be silently repaired.
    pub fn open(path: impl AsRef<Path>, options: ZFileOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        let file: SharedFile = Rc::new(RefCell::new(file));

        let mut zfile = Self {
            file,
            path,
            options,
            entries: BTreeMap::new(),
            extensions: Vec::new(),
            dirty: true,
            entries_end: 0,
            extra_directory_offset: 0,
            cd_offset: 0,
            cd_size: 0,
            eocd_comment: Vec::new(),
            closed: false,
        };

        if len > 0 {
            zfile.parse_existing(len)?;
        } else {
            debug!(path = %zfile.path.display(), "creating new archive");
        }
        Ok(zfile)
    }

    fn parse_existing(&mut self, len: u64) -> Result<()> {
        let tail_start = len.saturating_sub((MAX_COMMENT_LEN + MIN_EOCD_SIZE) as u64);
        let tail = self.direct_read_range(tail_start, len)?;
        let (eocd, pos) = Eocd::find(&tail)?;
        let eocd_offset = tail_start + pos as u64;

        let cd_offset = eocd.cd_offset as u64;
        let cd_size = eocd.cd_size as u64;
        if cd_offset + cd_size != eocd_offset {
            return Err(DroidZipError::invalid_header(
                "central directory does not end at the EOCD record",
            ));
        }

        let cd = self.direct_read_range(cd_offset, cd_offset + cd_size)?;
        let mut pos = 0usize;
        for _ in 0..eocd.total_entries {
            let (cdh, consumed) = CentralDirectoryHeader::parse(&cd, pos)?;
            pos += consumed;
            let entry = StoredEntry::from_disk(
                cdh,
                Rc::clone(&self.file),
                self.options.ignore_timestamps,
            )?;
            let name = entry.name().to_string();
            if self.entries.insert(name.clone(), entry).is_some() {
                return Err(DroidZipError::invalid_header(format!(
                    "duplicate entry '{name}' in central directory"
                )));
            }
        }
        if pos != cd.len() {
            return Err(DroidZipError::invalid_header(
                "trailing bytes in central directory",
            ));
        }

        let mut entries_end = 0u64;
        for entry in self.entries.values() {
            let offset = entry.cdh().offset().ok_or_else(|| {
                DroidZipError::invalid_header("parsed entry has no local header offset")
            })?;
            entries_end = entries_end.max(offset + entry.in_file_size()?);
        }
        if cd_offset < entries_end {
            return Err(DroidZipError::invalid_header(
                "central directory overlaps entry data",
            ));
        }

        self.entries_end = entries_end;
        // Bytes between the last entry and the central directory are
        // out-of-band data owned by an extension (an APK signing block);
        // recover the gap so a clean reopen stays byte-stable.
        self.extra_directory_offset = cd_offset - entries_end;
        self.cd_offset = cd_offset;
        self.cd_size = cd_size;
        self.eocd_comment = eocd.comment;
        self.dirty = false;
        debug!(
            path = %self.path.display(),
            entries = self.entries.len(),
            cd_offset,
            gap = self.extra_directory_offset,
            "opened existing archive"
        );
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a live entry by name.
    pub fn get(&self, name: &str) -> Option<&StoredEntry> {
        self.entries.get(name)
    }

    /// Iterate over all live entries, in name order.
    pub fn entries(&self) -> impl Iterator<Item = &StoredEntry> {
        self.entries.values()
    }

    /// Names of all live entries, in name order.
    pub fn entry_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Read the logical content of the named entry.
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        self.get(name)
            .ok_or_else(|| DroidZipError::entry_not_found(name))?
            .read()
    }

    /// Register a new or replacing entry. Nothing is written to disk until
    /// [`update`](Self::update).
    ///
    /// When `compress` is set the content is DEFLATE-compressed, unless
    /// storing is smaller.
    pub fn add(&mut self, name: &str, data: &[u8], compress: bool) -> Result<()> {
        self.check_open()?;
        if name.is_empty() {
            return Err(DroidZipError::precondition("entry name is empty"));
        }
        let is_dir = name.ends_with('/');
        if is_dir && !data.is_empty() {
            return Err(DroidZipError::precondition(format!(
                "directory entry '{name}' cannot carry content"
            )));
        }
        check_u32("uncompressed size", data.len() as u64)?;

        let crc32 = crc32fast::hash(data);
        let (raw, method) = if compress && !is_dir && !data.is_empty() {
            let mut encoder = DeflateEncoder::new(
                Vec::new(),
                Compression::new(self.options.compression_level),
            );
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;
            if compressed.len() < data.len() {
                (compressed, CompressionMethod::Deflate)
            } else {
                (data.to_vec(), CompressionMethod::Stored)
            }
        } else {
            (data.to_vec(), CompressionMethod::Stored)
        };

        let (_, name_flags) = encode_name(name);
        let info = CompressionInfo {
            method,
            compressed_size: raw.len() as u64,
            uncompressed_size: data.len() as u64,
            crc32,
        };
        let cdh = CentralDirectoryHeader::new_pending(name.to_string(), name_flags, info);
        let entry = StoredEntry::new_pending(cdh, data.to_vec(), raw)?;

        // A replace suppresses the removed notification; observers see a
        // single added event with the replaced marker instead.
        let replaced = if let Some(mut old) = self.entries.remove(name) {
            old.mark_deleted();
            true
        } else {
            false
        };
        self.entries.insert(name.to_string(), entry);
        self.dirty = true;
        debug!(name, replaced, compress, "entry added");
        self.notify_added(name, replaced)
    }

    /// Delete the named entry, returning it in its terminal state.
    pub fn delete(&mut self, name: &str) -> Result<StoredEntry> {
        self.check_open()?;
        let mut entry = self
            .entries
            .remove(name)
            .ok_or_else(|| DroidZipError::entry_not_found(name))?;
        entry.mark_deleted();
        self.dirty = true;
        debug!(name, "entry deleted");
        self.notify_removed(name)?;
        Ok(entry)
    }

    /// If the named entry's on-disk placement violates the alignment
    /// policy, detach it for rewriting at a conforming offset. Returns
    /// whether any change occurred; no change is not an error.
    pub fn realign(&mut self, name: &str) -> Result<bool> {
        self.check_open()?;
        let Some(rule) = self.options.alignment.clone() else {
            return Ok(false);
        };
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| DroidZipError::entry_not_found(name))?;
        if entry.entry_type().is_dir() {
            return Ok(false);
        }
        if entry.cdh().compress_info().wait()?.method != CompressionMethod::Stored {
            return Ok(false);
        }
        let alignment = rule.alignment_for(name) as u64;
        if alignment <= 1 {
            return Ok(false);
        }
        let Some(offset) = entry.cdh().offset() else {
            // Not placed yet; placement will honor the policy.
            return Ok(false);
        };
        if (offset + entry.local_header_size()) % alignment == 0 {
            return Ok(false);
        }

        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| DroidZipError::entry_not_found(name))?;
        entry.detach_to_memory()?;
        entry.set_local_extra(Vec::new());
        self.dirty = true;
        debug!(name, alignment, "entry detached for realignment");
        Ok(true)
    }

    /// Perform the full write cycle.
    ///
    /// Fires `before_update` on every extension, writes all pending entries
    /// and the rebuilt central directory and EOCD if anything changed, then
    /// fires `entries_written`, re-running the write pass while hooks keep
    /// the archive dirty. A clean archive with clean extensions writes
    /// nothing, but `entries_written` still fires so extensions can repair
    /// out-of-band bytes without touching the entry layout.
    pub fn update(&mut self) -> Result<()> {
        self.check_open()?;
        self.notify_before_update()?;
        loop {
            if self.dirty {
                self.write_pending()?;
            }
            self.notify_entries_written()?;
            if !self.dirty {
                return Ok(());
            }
        }
    }

    /// Close the archive: update, fire `closed` hooks, release the file.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.update()?;
        self.notify_closed()?;
        self.closed = true;
        debug!(path = %self.path.display(), "archive closed");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(DroidZipError::precondition("archive is closed"))
        } else {
            Ok(())
        }
    }

    fn write_pending(&mut self) -> Result<()> {
        // Existing placements, sorted by offset, bound the free ranges.
        let mut used: Vec<(u64, u64)> = Vec::with_capacity(self.entries.len());
        let mut pending: Vec<String> = Vec::new();
        for entry in self.entries.values() {
            match entry.cdh().offset() {
                Some(offset) => used.push((offset, entry.in_file_size()?)),
                None => pending.push(entry.name().to_string()),
            }
        }
        used.sort_unstable_by_key(|&(offset, _)| offset);

        for name in pending {
            let (offset, padding) = {
                let entry = self
                    .entries
                    .get(&name)
                    .ok_or_else(|| DroidZipError::entry_not_found(&name))?;
                let alignment = self.placement_alignment(entry)?;
                self.place(&used, entry.local_header_size(), entry.in_file_size()?, alignment)
            };
            let entry = self
                .entries
                .get_mut(&name)
                .ok_or_else(|| DroidZipError::entry_not_found(&name))?;
            if padding > 0 {
                let mut extra = entry.local_extra().to_vec();
                extra.extend(std::iter::repeat_n(0u8, padding as usize));
                entry.set_local_extra(extra);
            }
            entry.cdh_mut().set_offset(offset);
            let header = entry.to_header_data()?;
            let raw = entry.read_raw()?;
            let size = entry.in_file_size()?;

            self.direct_write(offset, &header)?;
            self.direct_write(offset + header.len() as u64, &raw)?;

            let at = used.partition_point(|&(o, _)| o < offset);
            used.insert(at, (offset, size));
            debug!(name = name.as_str(), offset, size, "entry written");
        }

        self.entries_end = used.iter().map(|&(o, l)| o + l).max().unwrap_or(0);

        if self.entries.len() > u16::MAX as usize {
            return Err(DroidZipError::too_large(
                "entry count",
                self.entries.len() as u64,
            ));
        }
        let mut cd = Vec::new();
        for entry in self.entries.values() {
            entry.cdh().write_to(&mut cd)?;
        }

        let cd_offset = self.entries_end + self.extra_directory_offset;
        check_u32("central directory offset", cd_offset)?;
        check_u32("central directory size", cd.len() as u64)?;
        self.direct_write(cd_offset, &cd)?;

        let eocd = Eocd {
            total_entries: self.entries.len() as u16,
            cd_size: cd.len() as u32,
            cd_offset: cd_offset as u32,
            comment: self.eocd_comment.clone(),
        };
        let eocd_bytes = eocd.to_bytes();
        self.direct_write(cd_offset + cd.len() as u64, &eocd_bytes)?;

        let end = cd_offset + cd.len() as u64 + eocd_bytes.len() as u64;
        self.file.borrow_mut().set_len(end)?;

        self.cd_offset = cd_offset;
        self.cd_size = cd.len() as u64;
        self.dirty = false;
        debug!(
            entries = self.entries.len(),
            cd_offset,
            extra_offset = self.extra_directory_offset,
            "write pass complete"
        );
        Ok(())
    }

    fn placement_alignment(&self, entry: &StoredEntry) -> Result<u64> {
        let Some(rule) = &self.options.alignment else {
            return Ok(1);
        };
        if entry.entry_type().is_dir()
            || entry.cdh().compress_info().wait()?.method != CompressionMethod::Stored
        {
            return Ok(1);
        }
        Ok(rule.alignment_for(entry.name()) as u64)
    }

    /// First-fit placement into the holes between `used` ranges, or append.
    /// Returns the chosen offset and the extra-field padding needed to align
    /// the data start.
    fn place(&self, used: &[(u64, u64)], header_size: u64, size: u64, alignment: u64) -> (u64, u64) {
        let pad_for = |offset: u64| -> u64 {
            let data_start = offset + header_size;
            (alignment - (data_start % alignment)) % alignment
        };
        let mut cursor = 0u64;
        for &(start, len) in used {
            if start > cursor {
                let padding = pad_for(cursor);
                if size + padding <= start - cursor {
                    return (cursor, padding);
                }
            }
            cursor = cursor.max(start + len);
        }
        (cursor, pad_for(cursor))
    }

    /// Fill `buf` from the given absolute file offset.
    pub fn direct_fully_read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Read the absolute file range `start..end`.
    pub fn direct_read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (end - start) as usize];
        self.direct_fully_read(start, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at the given absolute file offset.
    pub fn direct_write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// A byte source over the absolute file range `start..end`.
    pub fn direct_open(&self, start: u64, end: u64) -> FileRegionSource {
        FileRegionSource::new(Rc::clone(&self.file), start, end.saturating_sub(start))
    }

    /// Offset of the central directory as of the last write pass (or as
    /// parsed from an existing archive).
    pub fn central_directory_offset(&self) -> u64 {
        self.cd_offset
    }

    /// The central directory bytes currently on disk.
    pub fn central_directory_bytes(&self) -> Result<Vec<u8>> {
        self.direct_read_range(self.cd_offset, self.cd_offset + self.cd_size)
    }

    /// The EOCD record bytes currently on disk.
    pub fn eocd_bytes(&self) -> Result<Vec<u8>> {
        let len = self.file.borrow().metadata()?.len();
        self.direct_read_range(self.cd_offset + self.cd_size, len)
    }

    /// Bytes reserved between the end of entry data and the central
    /// directory, for out-of-band data such as an APK signing block.
    pub fn extra_directory_offset(&self) -> u64 {
        self.extra_directory_offset
    }

    /// Reserve `offset` bytes before the central directory, shifting its
    /// recorded start by exactly that amount on the next write pass.
    pub fn set_extra_directory_offset(&mut self, offset: u64) {
        if self.extra_directory_offset != offset {
            self.extra_directory_offset = offset;
            self.dirty = true;
            debug!(offset, "extra directory offset changed");
        }
    }

    /// Archive comment bytes from the EOCD record.
    pub fn comment(&self) -> &[u8] {
        &self.eocd_comment
    }

    /// Register an extension. Registering the same extension twice is a
    /// programming error.
    pub fn add_extension(&mut self, extension: Rc<dyn ZFileExtension>) -> Result<()> {
        self.check_open()?;
        if self
            .extensions
            .iter()
            .any(|existing| Rc::ptr_eq(existing, &extension))
        {
            return Err(DroidZipError::precondition("extension registered twice"));
        }
        self.extensions.push(extension);
        Ok(())
    }

    fn notify_added(&mut self, name: &str, replaced: bool) -> Result<()> {
        for extension in self.extensions.clone() {
            extension.added(self, name, replaced)?;
        }
        Ok(())
    }

    fn notify_removed(&mut self, name: &str) -> Result<()> {
        for extension in self.extensions.clone() {
            extension.removed(self, name)?;
        }
        Ok(())
    }

    fn notify_before_update(&mut self) -> Result<()> {
        for extension in self.extensions.clone() {
            extension.before_update(self)?;
        }
        Ok(())
    }

    fn notify_entries_written(&mut self) -> Result<()> {
        for extension in self.extensions.clone() {
            extension.entries_written(self)?;
        }
        Ok(())
    }

    fn notify_closed(&mut self) -> Result<()> {
        for extension in self.extensions.clone() {
            extension.closed(self)?;
        }
        Ok(())
    }
}

impl Drop for ZFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_rule() {
        let rule = AlignmentRule::new(4).with_suffix(".so", 4096);
        assert_eq!(rule.alignment_for("a.txt"), 4);
        assert_eq!(rule.alignment_for("lib/arm64/libfoo.so"), 4096);

        let rule = AlignmentRule::new(0);
        assert_eq!(rule.alignment_for("a.txt"), 1);
    }

    #[test]
    fn test_place_appends_when_no_holes() {
        let dir = tempfile::tempdir().unwrap();
        let zf = ZFile::open(dir.path().join("t.zip"), ZFileOptions::default()).unwrap();
        let used = [(0u64, 100u64), (100, 50)];
        assert_eq!(zf.place(&used, 30, 40, 1), (150, 0));
    }

    #[test]
    fn test_place_first_fit_hole() {
        let dir = tempfile::tempdir().unwrap();
        let zf = ZFile::open(dir.path().join("t.zip"), ZFileOptions::default()).unwrap();
        // Hole of 60 bytes at offset 40.
        let used = [(0u64, 40u64), (100, 10)];
        assert_eq!(zf.place(&used, 30, 50, 1), (40, 0));
        // Too big for the hole, appends.
        assert_eq!(zf.place(&used, 30, 70, 1), (110, 0));
    }

    #[test]
    fn test_place_alignment_padding() {
        let dir = tempfile::tempdir().unwrap();
        let zf = ZFile::open(dir.path().join("t.zip"), ZFileOptions::default()).unwrap();
        // Data would start at 35 + 30 = 65; 3 bytes of padding align it to 68.
        let used = [(0u64, 35u64)];
        assert_eq!(zf.place(&used, 30, 10, 4), (35, 3));
    }
}
