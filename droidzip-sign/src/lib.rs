//! # DroidZip Sign
//!
//! The two extensions that turn a [`droidzip_archive::ZFile`] into a
//! correctly-signed Android package:
//!
//! - [`manifest::ManifestGenerationExtension`] keeps a current
//!   `META-INF/MANIFEST.MF` entry with a stable, cached byte form.
//! - [`signing::SigningExtension`] adapts archive lifecycle events to an
//!   external [`engine::SignerEngine`], producing v1 (JAR) signature
//!   entries and the v2 APK Signing Block with minimal re-work across
//!   incremental builds.
//!
//! Cryptographic signature computation lives behind the narrow
//! [`engine::SignerEngine`] contract; this crate handles everything around
//! it: change tracking, signature entry placement, and block insertion.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod block;
pub mod engine;
pub mod manifest;
pub mod signing;

// Re-exports
pub use block::{ApkSigningBlock, V2_BLOCK_ID};
pub use engine::{SignableData, SignatureEntry, SignerEngine};
pub use manifest::{MANIFEST_NAME, Manifest, ManifestGenerationExtension};
pub use signing::{SigningExtension, SigningOptions};
