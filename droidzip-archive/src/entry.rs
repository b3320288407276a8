//! Stored entries.
//!
//! A [`StoredEntry`] is one logical file or directory inside the archive:
//! its central directory header, lifecycle state, local extra bytes, data
//! descriptor, and a pair of byte sources (raw as stored, processed as
//! logical content).
//!
//! Entries already on disk are verified against their local header exactly
//! once, when first wrapped; any mismatch between local and central metadata
//! means the archive cannot be trusted and is a fatal error.

use crate::records::{
    CompressionMethod, CentralDirectoryHeader, DATA_DESCRIPTOR_SIG, FLAG_DEFERRED_CRC,
    LOCAL_FILE_HEADER_SIG, LOCAL_HEADER_FIXED_SIZE, LocalFixedHeader, decode_name, read_u32,
};
use droidzip_core::error::{DroidZipError, Result};
use droidzip_core::source::{ByteSource, FileRegionSource, InflateSource, MemorySource, SharedFile};
use std::io::{Read, Seek, SeekFrom};

/// Entry type, derived from whether the name ends with the path separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl EntryType {
    /// Derive the type from an entry name.
    pub fn from_name(name: &str) -> Self {
        if name.ends_with('/') {
            Self::Directory
        } else {
            Self::File
        }
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Kind of trailing data descriptor following an entry's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDescriptorType {
    /// No data descriptor (deferred-CRC bit not set).
    None,
    /// Descriptor preceded by the `0x08074b50` marker.
    WithSignature,
    /// Descriptor without the optional marker.
    WithoutSignature,
}

impl DataDescriptorType {
    /// On-disk size of the descriptor in bytes.
    pub fn byte_size(&self) -> u64 {
        match self {
            Self::None => 0,
            Self::WithSignature => 16,
            Self::WithoutSignature => 12,
        }
    }
}

/// One logical file or directory stored in the archive.
pub struct StoredEntry {
    cdh: CentralDirectoryHeader,
    entry_type: EntryType,
    deleted: bool,
    local_extra: Vec<u8>,
    descriptor: DataDescriptorType,
    raw: Box<dyn ByteSource>,
    processed: Box<dyn ByteSource>,
}

impl StoredEntry {
    /// Wrap an entry that already exists on disk, verifying its local header
    /// against the central directory header.
    ///
    /// The header must carry an on-disk offset; the content comes from the
    /// file, never from a supplied source.
    pub(crate) fn from_disk(
        cdh: CentralDirectoryHeader,
        file: SharedFile,
        ignore_timestamps: bool,
    ) -> Result<Self> {
        let offset = cdh.offset().ok_or_else(|| {
            DroidZipError::precondition("on-disk entry constructed without an offset")
        })?;
        let entry_type = EntryType::from_name(cdh.name());
        let info = *cdh.compress_info().wait()?;

        if entry_type.is_dir() {
            Self::check_directory_invariants(cdh.name(), info.crc32, info.uncompressed_size, info.compressed_size)?;
        }

        let (local_extra, descriptor) =
            Self::verify_local_header(&cdh, &file, offset, ignore_timestamps)?;

        let data_start =
            offset + LOCAL_HEADER_FIXED_SIZE as u64 + cdh.encoded_name().len() as u64 + local_extra.len() as u64;

        let raw: Box<dyn ByteSource> =
            Box::new(FileRegionSource::new(file.clone(), data_start, info.compressed_size));
        let processed: Box<dyn ByteSource> = if entry_type.is_dir() {
            Box::new(MemorySource::new(Vec::new()))
        } else {
            match info.method {
                CompressionMethod::Stored => Box::new(FileRegionSource::new(
                    file,
                    data_start,
                    info.compressed_size,
                )),
                CompressionMethod::Deflate => Box::new(InflateSource::new(
                    Box::new(FileRegionSource::new(file, data_start, info.compressed_size)),
                    info.uncompressed_size,
                )),
                CompressionMethod::Unknown(m) => {
                    return Err(DroidZipError::UnsupportedMethod { method: m });
                }
            }
        };

        Ok(Self {
            cdh,
            entry_type,
            deleted: false,
            local_extra,
            descriptor,
            raw,
            processed,
        })
    }

    /// Create an entry from new content that is not on disk yet.
    ///
    /// The header must not carry an offset; content sources are mandatory.
    pub(crate) fn new_pending(
        cdh: CentralDirectoryHeader,
        processed_bytes: Vec<u8>,
        raw_bytes: Vec<u8>,
    ) -> Result<Self> {
        if cdh.offset().is_some() {
            return Err(DroidZipError::precondition(
                "content source supplied for an entry already on disk",
            ));
        }
        let entry_type = EntryType::from_name(cdh.name());
        let info = *cdh.compress_info().wait()?;
        if entry_type.is_dir() {
            Self::check_directory_invariants(cdh.name(), info.crc32, info.uncompressed_size, info.compressed_size)?;
        }
        Ok(Self {
            cdh,
            entry_type,
            deleted: false,
            local_extra: Vec::new(),
            descriptor: DataDescriptorType::None,
            raw: Box::new(MemorySource::new(raw_bytes)),
            processed: Box::new(MemorySource::new(processed_bytes)),
        })
    }

    fn check_directory_invariants(
        name: &str,
        crc32: u32,
        uncompressed_size: u64,
        compressed_size: u64,
    ) -> Result<()> {
        // Some tools emit a 2-byte empty DEFLATE stream for directories.
        if crc32 != 0 || uncompressed_size != 0 || !(compressed_size == 0 || compressed_size == 2) {
            return Err(DroidZipError::invalid_header(format!(
                "directory entry '{name}' has non-empty content"
            )));
        }
        Ok(())
    }

    /// Verify the on-disk local header against the central directory header.
    ///
    /// Runs once, when the entry is first wrapped. Returns the verbatim
    /// local extra bytes and the data descriptor type.
    fn verify_local_header(
        cdh: &CentralDirectoryHeader,
        file: &SharedFile,
        offset: u64,
        ignore_timestamps: bool,
    ) -> Result<(Vec<u8>, DataDescriptorType)> {
        let info = *cdh.compress_info().wait()?;
        let name = cdh.name();

        let mut fixed = [0u8; LOCAL_HEADER_FIXED_SIZE];
        {
            let mut f = file.borrow_mut();
            f.seek(SeekFrom::Start(offset))?;
            f.read_exact(&mut fixed)?;
        }
        let local = LocalFixedHeader::parse(&fixed)?;

        if local.version_extract != cdh.version_extract {
            return Err(DroidZipError::header_mismatch(
                name,
                "version to extract",
                local.version_extract as u64,
                cdh.version_extract as u64,
            ));
        }
        if local.flags != cdh.flags {
            return Err(DroidZipError::header_mismatch(
                name,
                "general-purpose bits",
                local.flags as u64,
                cdh.flags as u64,
            ));
        }
        if local.method != info.method.to_u16() {
            return Err(DroidZipError::header_mismatch(
                name,
                "compression method",
                local.method as u64,
                info.method.to_u16() as u64,
            ));
        }
        if !ignore_timestamps {
            if local.last_mod_time != cdh.last_mod_time {
                return Err(DroidZipError::header_mismatch(
                    name,
                    "last modification time",
                    local.last_mod_time as u64,
                    cdh.last_mod_time as u64,
                ));
            }
            if local.last_mod_date != cdh.last_mod_date {
                return Err(DroidZipError::header_mismatch(
                    name,
                    "last modification date",
                    local.last_mod_date as u64,
                    cdh.last_mod_date as u64,
                ));
            }
        }

        let deferred = cdh.has_deferred_crc();
        if deferred {
            // CRC and sizes must all be zero; the real values trail the data.
            if local.crc32 != 0 || local.compressed_size != 0 || local.uncompressed_size != 0 {
                return Err(DroidZipError::invalid_header(format!(
                    "entry '{name}' defers CRC but has non-zero local CRC/sizes"
                )));
            }
        } else {
            if local.crc32 != info.crc32 {
                return Err(DroidZipError::header_mismatch(
                    name,
                    "crc32",
                    local.crc32 as u64,
                    info.crc32 as u64,
                ));
            }
            if local.compressed_size as u64 != info.compressed_size {
                return Err(DroidZipError::header_mismatch(
                    name,
                    "compressed size",
                    local.compressed_size as u64,
                    info.compressed_size,
                ));
            }
            if local.uncompressed_size as u64 != info.uncompressed_size {
                return Err(DroidZipError::header_mismatch(
                    name,
                    "uncompressed size",
                    local.uncompressed_size as u64,
                    info.uncompressed_size,
                ));
            }
        }

        // The local name must decode, under the flag-selected encoding, to
        // the same string as the central directory name.
        let mut name_bytes = vec![0u8; local.name_len];
        let mut local_extra = vec![0u8; local.extra_len];
        {
            let mut f = file.borrow_mut();
            f.seek(SeekFrom::Start(offset + LOCAL_HEADER_FIXED_SIZE as u64))?;
            f.read_exact(&mut name_bytes)?;
            f.read_exact(&mut local_extra)?;
        }
        let local_name = decode_name(&name_bytes, local.flags)?;
        if local_name != name {
            return Err(DroidZipError::invalid_header(format!(
                "local header name '{local_name}' does not match central directory name '{name}'"
            )));
        }

        // Directories never carry a descriptor regardless of the flag bits;
        // they have no data to defer.
        let entry_type = EntryType::from_name(name);
        let descriptor = if deferred && !entry_type.is_dir() {
            Self::verify_data_descriptor(
                cdh,
                file,
                offset
                    + LOCAL_HEADER_FIXED_SIZE as u64
                    + local.name_len as u64
                    + local.extra_len as u64
                    + info.compressed_size,
            )?
        } else {
            DataDescriptorType::None
        };

        Ok((local_extra, descriptor))
    }

    /// Locate and verify the trailing data descriptor at `at`.
    fn verify_data_descriptor(
        cdh: &CentralDirectoryHeader,
        file: &SharedFile,
        at: u64,
    ) -> Result<DataDescriptorType> {
        let info = *cdh.compress_info().wait()?;
        let name = cdh.name();

        let mut buf = [0u8; 16];
        let read = {
            let mut f = file.borrow_mut();
            f.seek(SeekFrom::Start(at))?;
            let mut total = 0;
            while total < buf.len() {
                let n = f.read(&mut buf[total..])?;
                if n == 0 {
                    break;
                }
                total += n;
            }
            total
        };

        let (kind, fields) = if read >= 4 && read_u32(&buf, 0) == DATA_DESCRIPTOR_SIG {
            if read < 16 {
                return Err(DroidZipError::invalid_header(format!(
                    "data descriptor for '{name}' is truncated"
                )));
            }
            (DataDescriptorType::WithSignature, &buf[4..16])
        } else {
            if read < 12 {
                return Err(DroidZipError::invalid_header(format!(
                    "data descriptor for '{name}' is truncated"
                )));
            }
            (DataDescriptorType::WithoutSignature, &buf[0..12])
        };

        let crc32 = read_u32(fields, 0);
        let compressed_size = read_u32(fields, 4) as u64;
        let uncompressed_size = read_u32(fields, 8) as u64;

        if crc32 != info.crc32 {
            return Err(DroidZipError::header_mismatch(
                name,
                "descriptor crc32",
                crc32 as u64,
                info.crc32 as u64,
            ));
        }
        if compressed_size != info.compressed_size {
            return Err(DroidZipError::header_mismatch(
                name,
                "descriptor compressed size",
                compressed_size,
                info.compressed_size,
            ));
        }
        if uncompressed_size != info.uncompressed_size {
            return Err(DroidZipError::header_mismatch(
                name,
                "descriptor uncompressed size",
                uncompressed_size,
                info.uncompressed_size,
            ));
        }

        Ok(kind)
    }

    /// Entry name.
    pub fn name(&self) -> &str {
        self.cdh.name()
    }

    /// Central directory header.
    pub fn cdh(&self) -> &CentralDirectoryHeader {
        &self.cdh
    }

    pub(crate) fn cdh_mut(&mut self) -> &mut CentralDirectoryHeader {
        &mut self.cdh
    }

    /// Entry type (file or directory).
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Whether the entry has been deleted from its archive.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Raw bytes of the local header extra field.
    pub fn local_extra(&self) -> &[u8] {
        &self.local_extra
    }

    pub(crate) fn set_local_extra(&mut self, extra: Vec<u8>) {
        self.local_extra = extra;
    }

    /// Kind of trailing data descriptor, if any.
    pub fn data_descriptor_type(&self) -> DataDescriptorType {
        self.descriptor
    }

    /// Open a stream over the logical (decompressed) content.
    pub fn open(&self) -> Result<Box<dyn Read>> {
        self.check_not_deleted()?;
        self.processed.open()
    }

    /// Read the logical (decompressed) content.
    pub fn read(&self) -> Result<Vec<u8>> {
        self.check_not_deleted()?;
        self.processed.read_all()
    }

    /// Read the raw (stored) bytes, exactly as they are placed on disk.
    pub fn read_raw(&self) -> Result<Vec<u8>> {
        self.check_not_deleted()?;
        self.raw.read_all()
    }

    fn check_not_deleted(&self) -> Result<()> {
        if self.deleted {
            Err(DroidZipError::entry_deleted(self.cdh.name()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Size of the local header, including name and extra bytes.
    pub fn local_header_size(&self) -> u64 {
        LOCAL_HEADER_FIXED_SIZE as u64
            + self.cdh.encoded_name().len() as u64
            + self.local_extra.len() as u64
    }

    /// Total bytes this entry occupies in the file: local header, data, and
    /// data descriptor.
    pub fn in_file_size(&self) -> Result<u64> {
        let info = self.cdh.compress_info().wait()?;
        Ok(self.local_header_size() + info.compressed_size + self.descriptor.byte_size())
    }

    /// Serialize the local header for this entry.
    pub fn to_header_data(&self) -> Result<Vec<u8>> {
        let info = self.cdh.compress_info().wait()?;
        let (crc32, compressed, uncompressed) = if self.cdh.has_deferred_crc() {
            (0u32, 0u32, 0u32)
        } else {
            (
                info.crc32,
                info.compressed_size as u32,
                info.uncompressed_size as u32,
            )
        };

        let mut out = Vec::with_capacity(self.local_header_size() as usize);
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&self.cdh.version_extract.to_le_bytes());
        out.extend_from_slice(&self.cdh.flags.to_le_bytes());
        out.extend_from_slice(&info.method.to_u16().to_le_bytes());
        out.extend_from_slice(&self.cdh.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.cdh.last_mod_date.to_le_bytes());
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out.extend_from_slice(&(self.cdh.encoded_name().len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.local_extra.len() as u16).to_le_bytes());
        out.extend_from_slice(self.cdh.encoded_name());
        out.extend_from_slice(&self.local_extra);
        Ok(out)
    }

    /// Replace file-backed sources with in-memory copies and forget the
    /// on-disk placement, so the entry can be rewritten elsewhere.
    ///
    /// The deferred-CRC flag is cleared: the values are known from the
    /// central directory, so the rewritten entry carries no descriptor.
    pub(crate) fn detach_to_memory(&mut self) -> Result<()> {
        let raw = self.raw.read_all()?;
        let processed = self.processed.read_all()?;
        self.raw = Box::new(MemorySource::new(raw));
        self.processed = Box::new(MemorySource::new(processed));
        self.cdh.flags &= !FLAG_DEFERRED_CRC;
        self.descriptor = DataDescriptorType::None;
        self.cdh.clear_offset();
        Ok(())
    }
}
