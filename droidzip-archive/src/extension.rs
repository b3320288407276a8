//! The extension protocol.
//!
//! A [`ZFileExtension`] observes and appends to an archive through a small
//! set of lifecycle hooks the archive invokes around mutation and
//! finalization. Each hook is optional; an extension implements only what it
//! needs. Hooks of the same kind fire in extension-registration order.
//!
//! Hooks receive `&self` and keep their own state behind interior
//! mutability; this lets an extension mutate the archive from inside a hook
//! (for example, add signature entries during `before_update`) and receive
//! the resulting `added` callbacks re-entrantly.

use crate::zfile::ZFile;
use droidzip_core::error::Result;

/// Lifecycle hooks invoked by a [`ZFile`] on its registered extensions.
pub trait ZFileExtension {
    /// An entry was registered with the archive. `replaced` is `true` when
    /// the add displaced an existing entry with the same name (the
    /// displaced entry generates no `removed` event).
    fn added(&self, zfile: &mut ZFile, name: &str, replaced: bool) -> Result<()> {
        let _ = (zfile, name, replaced);
        Ok(())
    }

    /// An entry was deleted from the archive.
    fn removed(&self, zfile: &mut ZFile, name: &str) -> Result<()> {
        let _ = (zfile, name);
        Ok(())
    }

    /// Fired once per [`ZFile::update`], before any entry bytes are
    /// written. The canonical place to inject or withdraw entries.
    fn before_update(&self, zfile: &mut ZFile) -> Result<()> {
        let _ = zfile;
        Ok(())
    }

    /// Fired once per [`ZFile::update`] once all entry bytes and the
    /// central directory are on disk, even when the update wrote nothing.
    /// Used for offset-dependent post-processing; if the hook dirties the
    /// archive again (for example via
    /// [`ZFile::set_extra_directory_offset`]), the write pass re-runs and
    /// this hook fires again.
    fn entries_written(&self, zfile: &mut ZFile) -> Result<()> {
        let _ = zfile;
        Ok(())
    }

    /// Fired once when the archive is closed, after the final update.
    fn closed(&self, zfile: &mut ZFile) -> Result<()> {
        let _ = zfile;
        Ok(())
    }
}
