//! # DroidZip Core
//!
//! Core components for the DroidZip archive engine.
//!
//! This crate provides the fundamental building blocks shared by the archive
//! and signing crates:
//!
//! - [`source`]: Byte sources - scoped readable ranges over files or
//!   transformed (decompressed) views of them
//! - [`cache`]: Memoization cells for lazily-computed byte representations
//!   and deferred values resolved off the critical path
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! DroidZip is designed as a layered stack:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ L3: Extensions                                          │
//! │     Manifest generation, v1/v2 APK signing              │
//! ├─────────────────────────────────────────────────────────┤
//! │ L2: Archive engine                                      │
//! │     ZFile, StoredEntry, extension protocol              │
//! ├─────────────────────────────────────────────────────────┤
//! │ L1: Building blocks (this crate)                        │
//! │     ByteSource, CachedBytes, Deferred, errors           │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod source;

// Re-exports for convenience
pub use cache::{CachedBytes, Deferred};
pub use error::{DroidZipError, Result, SigningPhase};
pub use source::{ByteSource, FileRegionSource, InflateSource, MemorySource};
