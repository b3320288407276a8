//! Memoization and deferred-value cells.
//!
//! [`CachedBytes`] holds a lazily-computed byte representation that must be
//! invalidated exactly when its logical source changes; re-serializing is not
//! guaranteed to reproduce identical bytes, and unstable bytes would force
//! needless re-signing. [`Deferred`] holds a value produced once, possibly
//! off the critical path, and read through a blocking accessor.

use crate::error::{DroidZipError, Result};
use std::cell::OnceCell;

/// A memoized byte representation with explicit invalidation.
///
/// All mutation of the logical state backing the cache must call [`reset`]
/// as part of the same operation; callers are expected to funnel such
/// mutations through a single setter rather than rely on call-site
/// discipline.
///
/// [`reset`]: CachedBytes::reset
#[derive(Debug, Default)]
pub struct CachedBytes {
    bytes: Option<Vec<u8>>,
}

impl CachedBytes {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-seeded with known-good bytes.
    pub fn seeded(bytes: Vec<u8>) -> Self {
        Self { bytes: Some(bytes) }
    }

    /// Get the cached bytes, if still valid.
    pub fn get(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// Store freshly computed bytes.
    pub fn set(&mut self, bytes: Vec<u8>) {
        self.bytes = Some(bytes);
    }

    /// Invalidate the cache.
    pub fn reset(&mut self) {
        self.bytes = None;
    }

    /// Whether the cache currently holds bytes.
    pub fn is_valid(&self) -> bool {
        self.bytes.is_some()
    }
}

/// A value produced once, read through a blocking accessor.
///
/// In this engine the producer always resolves the value synchronously
/// before any consumer calls [`wait`], but the abstraction supports a
/// producer completing it off the critical path. Reading an unresolved
/// value is a programming error.
///
/// [`wait`]: Deferred::wait
#[derive(Debug, Default)]
pub struct Deferred<T> {
    cell: OnceCell<T>,
}

impl<T> Deferred<T> {
    /// Create an unresolved deferred value.
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Create an already-resolved deferred value.
    pub fn resolved(value: T) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(value);
        Self { cell }
    }

    /// Resolve the value. Fails if already resolved.
    pub fn set(&self, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| DroidZipError::precondition("deferred value resolved twice"))
    }

    /// Block until the value is available and return it.
    pub fn wait(&self) -> Result<&T> {
        self.cell
            .get()
            .ok_or_else(|| DroidZipError::precondition("deferred value read before resolution"))
    }

    /// Get the value if already resolved.
    pub fn try_get(&self) -> Option<&T> {
        self.cell.get()
    }
}
