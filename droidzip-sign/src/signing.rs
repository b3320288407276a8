//! The signing extension.
//!
//! Keeps the archive's v1 (JAR) and v2 (APK Signing Block) signatures
//! consistent with final content while minimizing wasted recomputation:
//! the signer engine is reconstructed per build session with no memory of
//! previous entries, so registration first checks whether the on-disk
//! signatures already satisfy the requested schemes and signer identity,
//! and only a dirty session replays state into the engine and re-signs.

use crate::block::{ApkSigningBlock, V2_BLOCK_ID, v2_signers};
use crate::engine::{SignableData, SignerEngine};
use crate::manifest::MANIFEST_NAME;
use droidzip_archive::{ZFile, ZFileExtension};
use droidzip_core::cache::CachedBytes;
use droidzip_core::error::{DroidZipError, Result};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::debug;

/// Which signature schemes to apply.
#[derive(Debug, Clone, Copy)]
pub struct SigningOptions {
    /// Produce v1 (JAR) signature entries.
    pub v1: bool,
    /// Produce the v2 APK Signing Block.
    pub v2: bool,
}

/// Adapts archive lifecycle events to an external [`SignerEngine`].
pub struct SigningExtension<E: SignerEngine> {
    options: SigningOptions,
    engine: RefCell<E>,
    dirty: Cell<bool>,
    /// Entry names the engine has been told about.
    processed: RefCell<BTreeSet<String>>,
    /// Signature entry names this extension itself wrote; they are outputs
    /// of the engine, never inputs to it.
    generated: RefCell<BTreeSet<String>>,
    cached_block: RefCell<CachedBytes>,
}

impl<E: SignerEngine + 'static> SigningExtension<E> {
    /// Create a signing extension around an engine.
    pub fn new(options: SigningOptions, engine: E) -> Self {
        Self {
            options,
            engine: RefCell::new(engine),
            dirty: Cell::new(false),
            processed: RefCell::new(BTreeSet::new()),
            generated: RefCell::new(BTreeSet::new()),
            cached_block: RefCell::new(CachedBytes::new()),
        }
    }

    /// Whether this session will re-sign the archive.
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Bind to an archive. The archive as currently on disk is checked
    /// against the requested schemes and the engine's certificate; any
    /// mismatch, or any verification failure, starts the session dirty.
    pub fn register(self: Rc<Self>, zfile: &mut ZFile) -> Result<()> {
        let current = match self.is_current(zfile) {
            Ok(current) => current,
            Err(error) => {
                // A malformed signature is not fatal here, it just means
                // the archive needs re-signing.
                debug!(%error, "signature verification inconclusive");
                false
            }
        };
        self.dirty.set(!current);
        debug!(dirty = !current, "signing extension registered");
        zfile.add_extension(self)
    }

    /// Check whether the on-disk signatures already satisfy the requested
    /// scheme set with exactly one signer matching the engine's
    /// certificate.
    fn is_current(&self, zfile: &ZFile) -> Result<bool> {
        if self.options.v2 {
            let Some(block) = ApkSigningBlock::extract_from(zfile)? else {
                return Ok(false);
            };
            let Some(value) = block.value_for(V2_BLOCK_ID) else {
                return Ok(false);
            };
            let signers = v2_signers(value)?;
            if signers.len() != 1 {
                return Ok(false);
            }
            let engine = self.engine.borrow();
            if signers[0].certificates.first().map(Vec::as_slice) != Some(engine.certificate()) {
                return Ok(false);
            }
        }
        if self.options.v1 {
            if zfile.get(MANIFEST_NAME).is_none() {
                return Ok(false);
            }
            let has_signature_file = zfile
                .entry_names()
                .iter()
                .any(|name| name.starts_with("META-INF/") && name.ends_with(".SF"));
            if !has_signature_file {
                return Ok(false);
            }
            if !self.options.v2 {
                // Without a v2 block to anchor the signer identity,
                // verifying v1 contents would need the full jarsigner
                // pipeline; treat the archive as needing a re-sign.
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The single dirty funnel: any content change invalidates the cached
    /// signing block.
    fn mark_dirty(&self) {
        self.dirty.set(true);
        self.cached_block.borrow_mut().reset();
    }

    fn signing_block(&self, zfile: &ZFile) -> Result<Vec<u8>> {
        if let Some(cached) = self.cached_block.borrow().get() {
            return Ok(cached.to_vec());
        }
        let block = if self.options.v2 {
            let entries_end = zfile.central_directory_offset() - zfile.extra_directory_offset();
            let entry_data = zfile.direct_read_range(0, entries_end)?;
            let central_directory = zfile.central_directory_bytes()?;
            let eocd = zfile.eocd_bytes()?;
            self.engine.borrow_mut().sign_block(&SignableData {
                entry_data: &entry_data,
                central_directory: &central_directory,
                eocd: &eocd,
            })?
        } else {
            Vec::new()
        };
        self.cached_block.borrow_mut().set(block.clone());
        Ok(block)
    }
}

impl<E: SignerEngine + 'static> ZFileExtension for SigningExtension<E> {
    fn added(&self, zfile: &mut ZFile, name: &str, _replaced: bool) -> Result<()> {
        if self.generated.borrow().contains(name) {
            return Ok(());
        }
        self.mark_dirty();
        // The entry may have been deleted again between registration and
        // this notification firing; the engine only sees live entries.
        // Anything other than a missing entry is a real failure.
        let data = match zfile.read_entry(name) {
            Ok(data) => data,
            Err(DroidZipError::EntryNotFound { .. } | DroidZipError::EntryDeleted { .. }) => {
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        self.engine.borrow_mut().output_entry(name, &data)?;
        self.processed.borrow_mut().insert(name.to_string());
        Ok(())
    }

    fn removed(&self, _zfile: &mut ZFile, name: &str) -> Result<()> {
        self.mark_dirty();
        self.generated.borrow_mut().remove(name);
        if self.processed.borrow_mut().remove(name) {
            self.engine.borrow_mut().output_entry_removed(name)?;
        }
        Ok(())
    }

    fn before_update(&self, zfile: &mut ZFile) -> Result<()> {
        if !self.dirty.get() {
            return Ok(());
        }

        // Reconcile: entries carried over from a previous session generate
        // no native added/removed events, so the engine must be told about
        // them here.
        let current: BTreeSet<String> = zfile
            .entry_names()
            .into_iter()
            .filter(|name| !self.generated.borrow().contains(name))
            .collect();
        let known: BTreeSet<String> = self.processed.borrow().clone();
        for name in current.difference(&known) {
            let data = zfile.read_entry(name)?;
            self.engine.borrow_mut().output_entry(name, &data)?;
            self.processed.borrow_mut().insert(name.clone());
        }
        for name in known.difference(&current) {
            self.engine.borrow_mut().output_entry_removed(name)?;
            self.processed.borrow_mut().remove(name);
        }

        if !self.options.v1 {
            return Ok(());
        }
        let mut entries = self.engine.borrow_mut().signature_entries()?;
        if entries.is_empty() {
            return Ok(());
        }
        // The manifest must land first: it overwrites whatever the
        // manifest extension staged, and the signature files digest it.
        entries.sort_by_key(|entry| entry.name != MANIFEST_NAME);
        for entry in entries {
            self.generated.borrow_mut().insert(entry.name.clone());
            if zfile.read_entry(&entry.name).ok().as_deref() != Some(&entry.data) {
                zfile.add(&entry.name, &entry.data, true)?;
            }
        }
        debug!("v1 signature entries staged");
        Ok(())
    }

    fn entries_written(&self, zfile: &mut ZFile) -> Result<()> {
        if !self.dirty.get() {
            return Ok(());
        }
        let block = self.signing_block(zfile)?;

        if zfile.extra_directory_offset() != block.len() as u64 {
            // Dirties the archive; the write pass re-runs with the
            // directory shifted and this hook fires again.
            zfile.set_extra_directory_offset(block.len() as u64);
            return Ok(());
        }
        if !block.is_empty() {
            let insert_at = zfile.central_directory_offset() - block.len() as u64;
            zfile.direct_write(insert_at, &block)?;
            debug!(len = block.len(), at = insert_at, "signing block written");
        }
        Ok(())
    }

    fn closed(&self, _zfile: &mut ZFile) -> Result<()> {
        if self.dirty.get() {
            self.engine.borrow_mut().done()?;
            self.dirty.set(false);
        }
        Ok(())
    }
}
