//! The external signer engine contract.
//!
//! Cryptographic signature computation is not this crate's business; it is
//! consumed through this narrow request/response interface. An engine is
//! reconstructed per build session and has no memory of previous entries;
//! the signing extension replays the archive state into it before asking
//! for signatures.

use droidzip_core::error::Result;

/// One v1 signature entry the engine wants written into the archive
/// (manifest, `.SF` signature file, or `.RSA`/`.DSA`/`.EC` block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    /// Archive entry name, under `META-INF/`.
    pub name: String,
    /// Entry content.
    pub data: Vec<u8>,
}

/// The byte ranges covered by a v2 APK signature.
///
/// The EOCD is handed over exactly as currently on disk, with the central
/// directory offset not yet shifted for the signing block; engines that
/// need the post-insertion offset patch it themselves, mirroring what v2
/// verifiers reverse.
#[derive(Debug)]
pub struct SignableData<'a> {
    /// All entry data, from the start of the file to the boundary before
    /// the central directory (excluding any previous signing block).
    pub entry_data: &'a [u8],
    /// The central directory bytes.
    pub central_directory: &'a [u8],
    /// The end-of-central-directory record bytes.
    pub eocd: &'a [u8],
}

/// A signer engine producing v1 (JAR) and v2 (APK Signing Block)
/// signatures for one archive session.
pub trait SignerEngine {
    /// DER bytes of the signing certificate. Used to decide whether an
    /// archive already signed on disk matches this signer's identity.
    fn certificate(&self) -> &[u8];

    /// An entry is (or will be) part of the output.
    fn output_entry(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// A previously reported entry is no longer part of the output.
    fn output_entry_removed(&mut self, name: &str) -> Result<()>;

    /// The v1 signature entries required to complete the JAR signature
    /// over everything reported so far. Empty when v1 is disabled or
    /// nothing is needed.
    fn signature_entries(&mut self) -> Result<Vec<SignatureEntry>>;

    /// Produce the complete APK Signing Block for the given byte ranges.
    /// An empty result means v2 is disabled or the engine declines.
    fn sign_block(&mut self, data: &SignableData<'_>) -> Result<Vec<u8>>;

    /// No further input will arrive for this session.
    fn done(&mut self) -> Result<()>;
}
