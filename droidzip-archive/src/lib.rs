//! # DroidZip Archive
//!
//! The incremental zip archive engine.
//!
//! A [`ZFile`] owns the on-disk representation of one zip archive: local
//! headers, entry placement, free space, the central directory, and the
//! end-of-central-directory record. Entries are mutated in memory and
//! written out on [`ZFile::update`]; when nothing changed, an update writes
//! nothing, so the on-disk bytes are stable across no-op build cycles.
//!
//! Independent features (manifest generation, APK signing) observe and
//! append to the archive through the [`extension::ZFileExtension`] protocol
//! without the core knowing about them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use droidzip_archive::zfile::{ZFile, ZFileOptions};
//!
//! let mut zf = ZFile::open("app.apk", ZFileOptions::default()).unwrap();
//! zf.add("assets/hello.txt", b"hi", true).unwrap();
//! zf.update().unwrap();
//! zf.close().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod entry;
pub mod extension;
pub mod records;
pub mod zfile;

// Re-exports
pub use entry::{DataDescriptorType, EntryType, StoredEntry};
pub use extension::ZFileExtension;
pub use records::{CentralDirectoryHeader, CompressionInfo, CompressionMethod, Eocd};
pub use zfile::{AlignmentRule, ZFile, ZFileOptions};
