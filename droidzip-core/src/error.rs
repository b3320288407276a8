//! Error types for DroidZip operations.
//!
//! This module provides a single error type covering all error conditions in
//! the archive engine and its extensions: I/O errors, zip format corruption,
//! state-precondition violations, and signer engine failures.

use std::io;
use thiserror::Error;

/// Phase of the signing pipeline in which a signer failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningPhase {
    /// Pre-check verification of the existing on-disk signature.
    Verification,
    /// Generation of the v1 (JAR) signature entries.
    V1,
    /// Generation of the v2 APK Signing Block.
    V2,
}

impl std::fmt::Display for SigningPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verification => write!(f, "signature verification"),
            Self::V1 => write!(f, "v1 signature generation"),
            Self::V2 => write!(f, "v2 signature generation"),
        }
    }
}

/// The main error type for DroidZip operations.
#[derive(Debug, Error)]
pub enum DroidZipError {
    /// I/O error from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic number in a zip record.
    #[error("Invalid magic number: expected {expected:02x?}, found {found:02x?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: Vec<u8>,
        /// Actual magic bytes found.
        found: Vec<u8>,
    },

    /// Invalid or corrupt record contents.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// A local header field does not match the central directory header.
    #[error("Local header mismatch for '{name}': {field} is {local:#x} locally, {central:#x} in central directory")]
    HeaderMismatch {
        /// Entry name.
        name: String,
        /// Name of the mismatching field.
        field: &'static str,
        /// Value read from the local header.
        local: u64,
        /// Value recorded in the central directory.
        central: u64,
    },

    /// Unsupported compression method.
    #[error("Unsupported compression method: {method}")]
    UnsupportedMethod {
        /// The compression method identifier.
        method: u16,
    },

    /// Entry name failed to decode under the flag-selected encoding.
    #[error("Encoding error: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Entry not found in archive.
    #[error("Entry not found: {name}")]
    EntryNotFound {
        /// Name of the missing entry.
        name: String,
    },

    /// Operation attempted on a deleted entry.
    #[error("Entry already deleted: {name}")]
    EntryDeleted {
        /// Name of the deleted entry.
        name: String,
    },

    /// A state precondition was violated by the caller.
    #[error("Precondition violated: {message}")]
    Precondition {
        /// Description of the violated precondition.
        message: String,
    },

    /// A value exceeds the range representable in the zip format.
    #[error("{what} too large for zip format: {value}")]
    TooLarge {
        /// What overflowed.
        what: &'static str,
        /// The offending value.
        value: u64,
    },

    /// Unsupported manifest version in an existing archive.
    #[error("Unsupported manifest version: {found}")]
    ManifestVersion {
        /// The version attribute value found.
        found: String,
    },

    /// Signer engine failure.
    #[error("Signing failed during {phase}: {message}")]
    Signing {
        /// Pipeline phase in which the failure occurred.
        phase: SigningPhase,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for DroidZip operations.
pub type Result<T> = std::result::Result<T, DroidZipError>;

impl DroidZipError {
    /// Create an invalid magic error.
    pub fn invalid_magic(expected: impl Into<Vec<u8>>, found: impl Into<Vec<u8>>) -> Self {
        Self::InvalidMagic {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create a local/central header mismatch error.
    pub fn header_mismatch(
        name: impl Into<String>,
        field: &'static str,
        local: u64,
        central: u64,
    ) -> Self {
        Self::HeaderMismatch {
            name: name.into(),
            field,
            local,
            central,
        }
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Create an entry not found error.
    pub fn entry_not_found(name: impl Into<String>) -> Self {
        Self::EntryNotFound { name: name.into() }
    }

    /// Create an entry deleted error.
    pub fn entry_deleted(name: impl Into<String>) -> Self {
        Self::EntryDeleted { name: name.into() }
    }

    /// Create a precondition violation error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create a too-large error.
    pub fn too_large(what: &'static str, value: u64) -> Self {
        Self::TooLarge { what, value }
    }

    /// Create a signing error for the given phase.
    pub fn signing(phase: SigningPhase, message: impl Into<String>) -> Self {
        Self::Signing {
            phase,
            message: message.into(),
        }
    }
}
