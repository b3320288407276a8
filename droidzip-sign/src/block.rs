//! APK Signing Block assembly and parsing.
//!
//! The signing block is not a zip entry: it is an opaque byte range sitting
//! immediately before the central directory, located by scanning backward
//! from the EOCD. Layout:
//!
//! ```text
//! u64 size of block      (excluding this field)
//! id/value pairs         (u64 pair length, u32 id, value bytes)
//! u64 size of block      (same value again)
//! magic "APK Sig Block 42"
//! ```
//!
//! Only enough of the v2 signature scheme's value structure is parsed here
//! to support the registration pre-check: counting signers and extracting
//! their certificate DER bytes.

use droidzip_archive::ZFile;
use droidzip_core::error::{DroidZipError, Result, SigningPhase};

/// Trailing magic identifying an APK Signing Block.
pub const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// Pair id of the APK Signature Scheme v2 block.
pub const V2_BLOCK_ID: u32 = 0x7109871A;

/// Minimum block size: two size fields and the magic, no pairs.
const MIN_BLOCK_SIZE: usize = 8 + 8 + 16;

/// A parsed or under-construction APK Signing Block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApkSigningBlock {
    pairs: Vec<(u32, Vec<u8>)>,
}

impl ApkSigningBlock {
    /// Create an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id/value pair.
    pub fn add_pair(&mut self, id: u32, value: Vec<u8>) {
        self.pairs.push((id, value));
    }

    /// Value of the first pair carrying `id`.
    pub fn value_for(&self, id: u32) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(pair_id, _)| *pair_id == id)
            .map(|(_, value)| value.as_slice())
    }

    /// Serialize the full block, sizes and magic included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let pairs_len: usize = self
            .pairs
            .iter()
            .map(|(_, value)| 8 + 4 + value.len())
            .sum();
        let block_size = (pairs_len + 8 + 16) as u64;

        let mut out = Vec::with_capacity(8 + block_size as usize);
        out.extend_from_slice(&block_size.to_le_bytes());
        for (id, value) in &self.pairs {
            out.extend_from_slice(&((4 + value.len()) as u64).to_le_bytes());
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(value);
        }
        out.extend_from_slice(&block_size.to_le_bytes());
        out.extend_from_slice(SIGNING_BLOCK_MAGIC);
        out
    }

    /// Parse a complete signing block.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_BLOCK_SIZE {
            return Err(verification_error("signing block too short"));
        }
        let magic = &bytes[bytes.len() - 16..];
        if magic != SIGNING_BLOCK_MAGIC {
            return Err(DroidZipError::invalid_magic(
                SIGNING_BLOCK_MAGIC.to_vec(),
                magic.to_vec(),
            ));
        }
        let leading = u64_at(bytes, 0)?;
        let trailing = u64_at(bytes, bytes.len() - 24)?;
        if leading != trailing || leading != (bytes.len() - 8) as u64 {
            return Err(verification_error("signing block size fields disagree"));
        }

        let mut pairs = Vec::new();
        let mut pos = 8usize;
        let end = bytes.len() - 24;
        while pos < end {
            // The pair length is untrusted; bound it before any offset
            // arithmetic so a hostile value cannot overflow.
            let pair_len = u64_at(bytes, pos)?;
            pos += 8;
            if pair_len < 4 || pair_len > (end - pos) as u64 {
                return Err(verification_error("signing block pair overruns the block"));
            }
            let pair_len = pair_len as usize;
            let id = u32_at(bytes, pos)?;
            let value = bytes[pos + 4..pos + pair_len].to_vec();
            pairs.push((id, value));
            pos += pair_len;
        }
        Ok(Self { pairs })
    }

    /// Locate and parse the signing block of an archive, using the gap the
    /// archive tracks between entry data and the central directory. Returns
    /// `None` when no block is present.
    pub fn extract_from(zfile: &ZFile) -> Result<Option<Self>> {
        let gap = zfile.extra_directory_offset();
        if gap == 0 {
            return Ok(None);
        }
        let cd_offset = zfile.central_directory_offset();
        let bytes = zfile.direct_read_range(cd_offset - gap, cd_offset)?;
        Ok(Some(Self::parse(&bytes)?))
    }
}

/// One signer parsed out of a v2 scheme value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Signer {
    /// Certificate chain DER bytes, leaf first.
    pub certificates: Vec<Vec<u8>>,
}

/// Parse the signers of a v2 scheme value, extracting each signer's
/// certificate chain. Signature and digest payloads are skipped, not
/// validated; full verification is the signer engine's business.
pub fn v2_signers(value: &[u8]) -> Result<Vec<V2Signer>> {
    let mut signers = Vec::new();
    let (sequence, rest) = prefixed(value)?;
    if !rest.is_empty() {
        return Err(verification_error("trailing bytes after v2 signer sequence"));
    }
    let mut cursor = sequence;
    while !cursor.is_empty() {
        let (signer, rest) = prefixed(cursor)?;
        cursor = rest;

        let (signed_data, _) = prefixed(signer)?;
        let (_digests, after_digests) = prefixed(signed_data)?;
        let (certificates, _) = prefixed(after_digests)?;

        let mut chain = Vec::new();
        let mut certs = certificates;
        while !certs.is_empty() {
            let (cert, rest) = prefixed(certs)?;
            chain.push(cert.to_vec());
            certs = rest;
        }
        signers.push(V2Signer {
            certificates: chain,
        });
    }
    Ok(signers)
}

/// Build a v2 scheme value with a single signer. The digest, signature,
/// and public key payloads are supplied opaque; only the certificate chain
/// structure matters to readers of this module.
pub fn v2_signer_value(
    certificate: &[u8],
    digests: &[u8],
    signatures: &[u8],
    public_key: &[u8],
) -> Vec<u8> {
    let certificates = with_prefix(certificate);
    let signed_data = [
        with_prefix(digests),
        with_prefix(&certificates),
        with_prefix(&[]), // additional attributes
    ]
    .concat();
    let signer = [
        with_prefix(&signed_data),
        with_prefix(signatures),
        with_prefix(public_key),
    ]
    .concat();
    with_prefix(&with_prefix(&signer))
}

/// Split a u32-length-prefixed field off the front of `bytes`.
fn prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let len = u32_at(bytes, 0)? as usize;
    let field = bytes
        .get(4..4 + len)
        .ok_or_else(|| verification_error("length-prefixed field overruns its container"))?;
    Ok((field, &bytes[4 + len..]))
}

fn with_prefix(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

fn u32_at(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| verification_error("signing block truncated"))
}

fn u64_at(bytes: &[u8], at: usize) -> Result<u64> {
    bytes
        .get(at..at + 8)
        .map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
        .ok_or_else(|| verification_error("signing block truncated"))
}

fn verification_error(message: &str) -> DroidZipError {
    DroidZipError::signing(SigningPhase::Verification, message)
}
