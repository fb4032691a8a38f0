//! Scratch (temporary) directory management.
//!
//! `genprotimg` stages prepared components on disk before writing the
//! final image. The scratch directory is created lazily, on first real
//! use, so that an argument-validation failure before any component is
//! prepared never leaves `ScratchDir` pointing at an uninitialised path
//! whose `Drop` would try to remove something that was never created.

use std::path::Path;

use tempfile::TempDir;

use crate::error::{GenprotimgError, IoError};

/// Owns a lazily-created temporary directory; removed on drop.
#[derive(Default)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn new() -> Self {
        Self { dir: None }
    }

    /// Returns the scratch directory's path, creating it on first call.
    pub fn ensure(&mut self) -> Result<&Path, GenprotimgError> {
        if self.dir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("genprotimg-")
                .tempdir()
                .map_err(|source| {
                    GenprotimgError::Io(IoError::Open {
                        path: std::env::temp_dir(),
                        source,
                    })
                })?;
            self.dir = Some(dir);
        }
        Ok(self.dir.as_ref().unwrap().path())
    }

    /// Path for a staged component of the given on-disk name, e.g.
    /// `kernel.bin`. Creates the scratch directory if it does not exist.
    pub fn component_path(&mut self, name: &str) -> Result<std::path::PathBuf, GenprotimgError> {
        Ok(self.ensure()?.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_created_and_removed() {
        let mut scratch = ScratchDir::new();
        assert!(scratch.dir.is_none());
        let path = scratch.ensure().unwrap().to_path_buf();
        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn never_used_is_noop_drop() {
        let scratch = ScratchDir::new();
        drop(scratch);
    }
}
