//! Zip binary records.
//!
//! Parsing and serialization of the fixed on-disk records: local file
//! headers, central directory headers, data descriptors, and the
//! end-of-central-directory record. Layout must match the zip specification
//! exactly for interoperability with standard zip/JAR/APK tooling.

use droidzip_core::cache::Deferred;
use droidzip_core::error::{DroidZipError, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Zip local file header signature.
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;

/// Zip central directory header signature.
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;

/// Zip end of central directory signature.
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;

/// Data descriptor signature (optional, PK\x07\x08).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// Fixed size of the local file header, before name and extra bytes.
pub const LOCAL_HEADER_FIXED_SIZE: usize = 30;

/// Fixed size of a central directory header, before variable fields.
pub const CENTRAL_HEADER_FIXED_SIZE: usize = 46;

/// Minimum EOCD record size (22 bytes, without comment).
pub const MIN_EOCD_SIZE: usize = 22;

/// Maximum zip comment length.
pub const MAX_COMMENT_LEN: usize = 65535;

/// General-purpose bit: entry is encrypted. Never supported here.
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// General-purpose bit: CRC and sizes deferred to a trailing data descriptor.
pub const FLAG_DEFERRED_CRC: u16 = 0x0008;

/// General-purpose bit: entry name and comment are UTF-8 encoded.
pub const FLAG_UTF8_NAME: u16 = 0x0800;

/// General-purpose bits this engine understands. Anything else set in an
/// existing archive means the archive cannot be trusted.
pub const SUPPORTED_FLAGS: u16 = FLAG_DEFERRED_CRC | FLAG_UTF8_NAME | 0x0002 | 0x0004;

/// Zip compression methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored (no compression).
    Stored,
    /// Deflate compression.
    Deflate,
    /// Unknown method.
    Unknown(u16),
}

impl CompressionMethod {
    /// Create from the on-disk u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            _ => Self::Unknown(value),
        }
    }

    /// Convert to the on-disk u16 value.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Unknown(id) => id,
        }
    }
}

/// Compression metadata for one entry.
///
/// May be computed asynchronously by a producer; consumers read it through
/// the blocking [`Deferred::wait`] accessor on the owning header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionInfo {
    /// Compression method.
    pub method: CompressionMethod,
    /// Size of the stored (possibly compressed) data.
    pub compressed_size: u64,
    /// Size of the logical (uncompressed) data.
    pub uncompressed_size: u64,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
}

/// Per-entry metadata stored in the central directory.
#[derive(Debug)]
pub struct CentralDirectoryHeader {
    /// Decoded entry name.
    name: String,
    /// Exact name bytes as stored on disk, kept verbatim so rewriting the
    /// central directory is byte-stable for any encoding.
    encoded_name: Vec<u8>,
    /// Version made by.
    pub made_by: u16,
    /// Minimum version needed to extract.
    pub version_extract: u16,
    /// General-purpose bit flags.
    pub flags: u16,
    /// Last modification time (DOS format).
    pub last_mod_time: u16,
    /// Last modification date (DOS format).
    pub last_mod_date: u16,
    /// Internal file attributes.
    pub internal_attributes: u16,
    /// External file attributes.
    pub external_attributes: u32,
    /// Central-directory extra field, kept verbatim.
    pub extra: Vec<u8>,
    /// Entry comment bytes, kept verbatim.
    pub comment: Vec<u8>,
    /// Local header offset; `None` for entries not yet written to disk.
    offset: Option<u64>,
    /// Compression metadata, possibly resolved off the critical path.
    compress_info: Deferred<CompressionInfo>,
}

impl CentralDirectoryHeader {
    /// Create a header for a new entry that has no on-disk placement yet.
    pub fn new_pending(name: String, flags: u16, info: CompressionInfo) -> Self {
        let encoded_name = name.as_bytes().to_vec();
        let (mod_time, mod_date) = dos_datetime_now();
        Self {
            name,
            encoded_name,
            made_by: 0x031E,
            version_extract: if info.method == CompressionMethod::Deflate {
                20
            } else {
                10
            },
            flags,
            last_mod_time: mod_time,
            last_mod_date: mod_date,
            internal_attributes: 0,
            external_attributes: 0,
            extra: Vec::new(),
            comment: Vec::new(),
            offset: None,
            compress_info: Deferred::resolved(info),
        }
    }

    /// Decoded entry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact name bytes as stored on disk.
    pub fn encoded_name(&self) -> &[u8] {
        &self.encoded_name
    }

    /// Local header offset, if the entry is already placed on disk.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Record the entry's on-disk placement.
    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// Forget the entry's on-disk placement (entry must be re-placed).
    pub(crate) fn clear_offset(&mut self) {
        self.offset = None;
    }

    /// Compression metadata cell.
    pub fn compress_info(&self) -> &Deferred<CompressionInfo> {
        &self.compress_info
    }

    /// Whether the deferred-CRC general-purpose bit is set.
    pub fn has_deferred_crc(&self) -> bool {
        self.flags & FLAG_DEFERRED_CRC != 0
    }

    /// Whether the name is UTF-8 encoded per the general-purpose bits.
    pub fn has_utf8_name(&self) -> bool {
        self.flags & FLAG_UTF8_NAME != 0
    }

    /// Parse one central directory header from `buf` starting at `pos`.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn parse(buf: &[u8], pos: usize) -> Result<(Self, usize)> {
        let fixed = buf
            .get(pos..pos + CENTRAL_HEADER_FIXED_SIZE)
            .ok_or_else(|| DroidZipError::invalid_header("central directory truncated"))?;

        let signature = read_u32(fixed, 0);
        if signature != CENTRAL_DIR_HEADER_SIG {
            return Err(DroidZipError::invalid_magic(
                CENTRAL_DIR_HEADER_SIG.to_le_bytes().to_vec(),
                signature.to_le_bytes().to_vec(),
            ));
        }

        let made_by = read_u16(fixed, 4);
        let version_extract = read_u16(fixed, 6);
        let flags = read_u16(fixed, 8);
        let method_raw = read_u16(fixed, 10);
        let last_mod_time = read_u16(fixed, 12);
        let last_mod_date = read_u16(fixed, 14);
        let crc32 = read_u32(fixed, 16);
        let compressed_size = read_u32(fixed, 20) as u64;
        let uncompressed_size = read_u32(fixed, 24) as u64;
        let name_len = read_u16(fixed, 28) as usize;
        let extra_len = read_u16(fixed, 30) as usize;
        let comment_len = read_u16(fixed, 32) as usize;
        let offset = read_u32(fixed, 42) as u64;

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(DroidZipError::invalid_header(format!(
                "entry at central directory position {pos} is encrypted"
            )));
        }
        if flags & !SUPPORTED_FLAGS != 0 {
            return Err(DroidZipError::invalid_header(format!(
                "unsupported general-purpose bits {:#06x} at central directory position {pos}",
                flags
            )));
        }
        let method = CompressionMethod::from_u16(method_raw);
        if matches!(method, CompressionMethod::Unknown(_)) {
            return Err(DroidZipError::UnsupportedMethod { method: method_raw });
        }

        let mut cursor = pos + CENTRAL_HEADER_FIXED_SIZE;
        let encoded_name = read_bytes(buf, &mut cursor, name_len)?;
        let extra = read_bytes(buf, &mut cursor, extra_len)?;
        let comment = read_bytes(buf, &mut cursor, comment_len)?;

        let name = decode_name(&encoded_name, flags)?;

        let header = Self {
            name,
            encoded_name,
            made_by,
            version_extract,
            flags,
            last_mod_time,
            last_mod_date,
            internal_attributes: read_u16(fixed, 36),
            external_attributes: read_u32(fixed, 38),
            extra,
            comment,
            offset: Some(offset),
            compress_info: Deferred::resolved(CompressionInfo {
                method,
                compressed_size,
                uncompressed_size,
                crc32,
            }),
        };
        Ok((header, cursor - pos))
    }

    /// Serialize this header into `out`.
    ///
    /// The entry must be placed (offset known) and its compression metadata
    /// resolved.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let info = self.compress_info.wait()?;
        let offset = self.offset.ok_or_else(|| {
            DroidZipError::precondition(format!("entry '{}' written to central directory before placement", self.name))
        })?;

        check_u32("compressed size", info.compressed_size)?;
        check_u32("uncompressed size", info.uncompressed_size)?;
        check_u32("local header offset", offset)?;

        out.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&self.made_by.to_le_bytes());
        out.extend_from_slice(&self.version_extract.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&info.method.to_u16().to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&info.crc32.to_le_bytes());
        out.extend_from_slice(&(info.compressed_size as u32).to_le_bytes());
        out.extend_from_slice(&(info.uncompressed_size as u32).to_le_bytes());
        out.extend_from_slice(&(self.encoded_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&self.encoded_name);
        out.extend_from_slice(&self.extra);
        out.extend_from_slice(&self.comment);
        Ok(())
    }
}

/// Fixed portion of a local file header, as read back for verification.
#[derive(Debug, Clone, Copy)]
pub struct LocalFixedHeader {
    /// Minimum version needed to extract.
    pub version_extract: u16,
    /// General-purpose bit flags.
    pub flags: u16,
    /// Compression method (raw).
    pub method: u16,
    /// Last modification time (DOS format).
    pub last_mod_time: u16,
    /// Last modification date (DOS format).
    pub last_mod_date: u16,
    /// CRC-32 of uncompressed data (zero when deferred).
    pub crc32: u32,
    /// Compressed size (zero when deferred).
    pub compressed_size: u32,
    /// Uncompressed size (zero when deferred).
    pub uncompressed_size: u32,
    /// Name length in bytes.
    pub name_len: usize,
    /// Extra field length in bytes.
    pub extra_len: usize,
}

impl LocalFixedHeader {
    /// Parse the 30-byte fixed local header.
    pub fn parse(buf: &[u8; LOCAL_HEADER_FIXED_SIZE]) -> Result<Self> {
        let signature = read_u32(buf, 0);
        if signature != LOCAL_FILE_HEADER_SIG {
            return Err(DroidZipError::invalid_magic(
                LOCAL_FILE_HEADER_SIG.to_le_bytes().to_vec(),
                signature.to_le_bytes().to_vec(),
            ));
        }
        Ok(Self {
            version_extract: read_u16(buf, 4),
            flags: read_u16(buf, 6),
            method: read_u16(buf, 8),
            last_mod_time: read_u16(buf, 10),
            last_mod_date: read_u16(buf, 12),
            crc32: read_u32(buf, 14),
            compressed_size: read_u32(buf, 18),
            uncompressed_size: read_u32(buf, 22),
            name_len: read_u16(buf, 26) as usize,
            extra_len: read_u16(buf, 28) as usize,
        })
    }
}

/// End of central directory record.
#[derive(Debug, Clone)]
pub struct Eocd {
    /// Total number of entries.
    pub total_entries: u16,
    /// Size of the central directory in bytes.
    pub cd_size: u32,
    /// File offset of the central directory start.
    pub cd_offset: u32,
    /// Archive comment bytes, kept verbatim.
    pub comment: Vec<u8>,
}

impl Eocd {
    /// Locate and parse the EOCD in `tail`, a buffer holding the final bytes
    /// of the file. Returns the record and its offset within `tail`.
    ///
    /// The signature bytes may also occur inside an archive comment, so
    /// candidates are tried from the end of the file backward and only a
    /// record whose comment runs exactly to end-of-file is accepted.
    pub fn find(tail: &[u8]) -> Result<(Self, usize)> {
        if tail.len() < MIN_EOCD_SIZE {
            return Err(DroidZipError::invalid_header(
                "file too small for a zip end-of-central-directory record",
            ));
        }
        let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
        for pos in (0..=tail.len() - MIN_EOCD_SIZE).rev() {
            if tail[pos..pos + 4] != sig {
                continue;
            }
            let Ok(record) = Self::parse(&tail[pos..]) else {
                continue;
            };
            if pos + MIN_EOCD_SIZE + record.comment.len() == tail.len() {
                return Ok((record, pos));
            }
        }
        Err(DroidZipError::invalid_header(
            "end of central directory not found",
        ))
    }

    /// Parse an EOCD record starting at the beginning of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < MIN_EOCD_SIZE {
            return Err(DroidZipError::invalid_header("EOCD too short"));
        }
        let signature = read_u32(buf, 0);
        if signature != END_OF_CENTRAL_DIR_SIG {
            return Err(DroidZipError::invalid_magic(
                END_OF_CENTRAL_DIR_SIG.to_le_bytes().to_vec(),
                signature.to_le_bytes().to_vec(),
            ));
        }
        let disk_number = read_u16(buf, 4);
        let disk_with_cd = read_u16(buf, 6);
        let disk_entries = read_u16(buf, 8);
        let total_entries = read_u16(buf, 10);
        if disk_number != 0 || disk_with_cd != 0 || disk_entries != total_entries {
            return Err(DroidZipError::invalid_header(
                "multi-disk archives are not supported",
            ));
        }
        let cd_size = read_u32(buf, 12);
        let cd_offset = read_u32(buf, 16);
        let comment_len = read_u16(buf, 20) as usize;
        let comment = buf
            .get(MIN_EOCD_SIZE..MIN_EOCD_SIZE + comment_len)
            .ok_or_else(|| DroidZipError::invalid_header("EOCD comment truncated"))?
            .to_vec();
        Ok(Self {
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    /// Serialize the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_EOCD_SIZE + self.comment.len());
        out.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number
        out.extend_from_slice(&0u16.to_le_bytes()); // disk with central directory
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}

/// Decode an entry name under the encoding selected by the general-purpose
/// bits: UTF-8 when the flag is set, CP437 otherwise.
pub fn decode_name(bytes: &[u8], flags: u16) -> Result<String> {
    if flags & FLAG_UTF8_NAME != 0 {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DroidZipError::encoding("entry name is not valid UTF-8"))
    } else {
        Ok(bytes
            .iter()
            .map(|&b| {
                if b < 0x80 {
                    b as char
                } else {
                    CP437_HIGH[(b - 0x80) as usize]
                }
            })
            .collect())
    }
}

/// Encode an entry name, returning the bytes and the general-purpose flags
/// required for them (the UTF-8 bit for non-ASCII names).
pub fn encode_name(name: &str) -> (Vec<u8>, u16) {
    if name.is_ascii() {
        (name.as_bytes().to_vec(), 0)
    } else {
        (name.as_bytes().to_vec(), FLAG_UTF8_NAME)
    }
}

/// CP437 code points 0x80..=0xFF.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// Current time in DOS date/time format.
pub fn dos_datetime_now() -> (u16, u16) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    dos_datetime(now.as_secs())
}

/// Convert a Unix timestamp (seconds, UTC) to DOS date/time format.
/// Timestamps before the DOS epoch (1980) yield a zero date.
pub fn dos_datetime(secs: u64) -> (u16, u16) {
    let days = secs / 86400;
    let time_of_day = secs % 86400;

    let hours = (time_of_day / 3600) as u16;
    let minutes = ((time_of_day % 3600) / 60) as u16;
    let seconds = ((time_of_day % 60) / 2) as u16; // DOS stores 2-second increments

    let mod_time = (hours << 11) | (minutes << 5) | seconds;

    let (year, month, day) = civil_from_days(days);
    let mod_date = if year >= 1980 {
        ((year - 1980) << 9) | (month << 5) | day
    } else {
        0
    };

    (mod_time, mod_date)
}

/// Convert days since 1970-01-01 to a (year, month, day) civil date,
/// Gregorian calendar with leap years.
fn civil_from_days(days: u64) -> (u16, u16, u16) {
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year as u16, month as u16, day as u16)
}

/// Check that a value fits in an unsigned 32-bit zip field.
pub fn check_u32(what: &'static str, value: u64) -> Result<()> {
    if value > u32::MAX as u64 {
        Err(DroidZipError::too_large(what, value))
    } else {
        Ok(())
    }
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_bytes(buf: &[u8], cursor: &mut usize, len: usize) -> Result<Vec<u8>> {
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or_else(|| DroidZipError::invalid_header("central directory truncated"))?
        .to_vec();
    *cursor += len;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_method() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert!(matches!(
            CompressionMethod::from_u16(99),
            CompressionMethod::Unknown(99)
        ));
        assert_eq!(CompressionMethod::Deflate.to_u16(), 8);
    }

    #[test]
    fn test_eocd_roundtrip() {
        let eocd = Eocd {
            total_entries: 3,
            cd_size: 200,
            cd_offset: 1000,
            comment: b"hello".to_vec(),
        };
        let bytes = eocd.to_bytes();
        assert_eq!(bytes.len(), MIN_EOCD_SIZE + 5);

        let parsed = Eocd::parse(&bytes).unwrap();
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.cd_size, 200);
        assert_eq!(parsed.cd_offset, 1000);
        assert_eq!(parsed.comment, b"hello");
    }

    #[test]
    fn test_eocd_find_scans_backward() {
        let eocd = Eocd {
            total_entries: 0,
            cd_size: 0,
            cd_offset: 42,
            comment: Vec::new(),
        };
        let mut tail = vec![0xAAu8; 100];
        tail.extend_from_slice(&eocd.to_bytes());

        let (found, pos) = Eocd::find(&tail).unwrap();
        assert_eq!(pos, 100);
        assert_eq!(found.cd_offset, 42);
    }

    #[test]
    fn test_eocd_find_ignores_signature_in_comment() {
        let eocd = Eocd {
            total_entries: 0,
            cd_size: 0,
            cd_offset: 0,
            comment: END_OF_CENTRAL_DIR_SIG.to_le_bytes().to_vec(),
        };
        let bytes = eocd.to_bytes();

        let (found, pos) = Eocd::find(&bytes).unwrap();
        assert_eq!(pos, 0);
        assert_eq!(found.comment, END_OF_CENTRAL_DIR_SIG.to_le_bytes());
    }

    #[test]
    fn test_eocd_missing() {
        let tail = vec![0u8; 64];
        assert!(Eocd::find(&tail).is_err());
    }

    #[test]
    fn test_decode_name_utf8_flag() {
        let name = "héllo.txt";
        let decoded = decode_name(name.as_bytes(), FLAG_UTF8_NAME).unwrap();
        assert_eq!(decoded, name);

        // Invalid UTF-8 under the UTF-8 flag is a fatal decode error.
        assert!(decode_name(&[0xFF, 0xFE], FLAG_UTF8_NAME).is_err());
    }

    #[test]
    fn test_decode_name_cp437() {
        // 0x82 is 'é' in CP437.
        let decoded = decode_name(&[b'r', b'\x82', b's', b'u', b'm', b'\x82'], 0).unwrap();
        assert_eq!(decoded, "résumé");
    }

    #[test]
    fn test_encode_name_sets_utf8_flag() {
        let (bytes, flags) = encode_name("plain.txt");
        assert_eq!(bytes, b"plain.txt");
        assert_eq!(flags, 0);

        let (bytes, flags) = encode_name("héllo.txt");
        assert_eq!(bytes, "héllo.txt".as_bytes());
        assert_eq!(flags, FLAG_UTF8_NAME);
    }

    #[test]
    fn test_dos_datetime_conversion() {
        // 2026-08-27 12:34:56 UTC
        let (time, date) = dos_datetime(1_787_834_096);
        assert_eq!(date >> 9, 2026 - 1980);
        assert_eq!((date >> 5) & 0xF, 8);
        assert_eq!(date & 0x1F, 27);
        assert_eq!(time >> 11, 12);
        assert_eq!((time >> 5) & 0x3F, 34);
        assert_eq!(time & 0x1F, 56 / 2);
    }

    #[test]
    fn test_dos_datetime_leap_day() {
        // 2024-02-29 00:00:00 UTC
        let (time, date) = dos_datetime(1_709_164_800);
        assert_eq!(date >> 9, 2024 - 1980);
        assert_eq!((date >> 5) & 0xF, 2);
        assert_eq!(date & 0x1F, 29);
        assert_eq!(time, 0);
    }

    #[test]
    fn test_dos_datetime_before_dos_epoch() {
        let (_, date) = dos_datetime(0);
        assert_eq!(date, 0);
    }

    #[test]
    fn test_cdh_roundtrip() {
        let mut cdh = CentralDirectoryHeader::new_pending(
            "a.txt".to_string(),
            0,
            CompressionInfo {
                method: CompressionMethod::Stored,
                compressed_size: 2,
                uncompressed_size: 2,
                crc32: 0xDEADBEEF,
            },
        );
        cdh.set_offset(64);

        let mut buf = Vec::new();
        cdh.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CENTRAL_HEADER_FIXED_SIZE + 5);

        let (parsed, consumed) = CentralDirectoryHeader::parse(&buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed.name(), "a.txt");
        assert_eq!(parsed.offset(), Some(64));
        let info = parsed.compress_info().wait().unwrap();
        assert_eq!(info.crc32, 0xDEADBEEF);
        assert_eq!(info.method, CompressionMethod::Stored);
    }

    #[test]
    fn test_cdh_rejects_encrypted() {
        let mut cdh = CentralDirectoryHeader::new_pending(
            "x".to_string(),
            0,
            CompressionInfo {
                method: CompressionMethod::Stored,
                compressed_size: 0,
                uncompressed_size: 0,
                crc32: 0,
            },
        );
        cdh.flags = FLAG_ENCRYPTED;
        cdh.set_offset(0);
        let mut buf = Vec::new();
        cdh.write_to(&mut buf).unwrap();
        assert!(CentralDirectoryHeader::parse(&buf, 0).is_err());
    }

    #[test]
    fn test_cdh_write_requires_placement() {
        let cdh = CentralDirectoryHeader::new_pending(
            "x".to_string(),
            0,
            CompressionInfo {
                method: CompressionMethod::Stored,
                compressed_size: 0,
                uncompressed_size: 0,
                crc32: 0,
            },
        );
        let mut buf = Vec::new();
        assert!(cdh.write_to(&mut buf).is_err());
    }
}
