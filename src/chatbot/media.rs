//! Scratch files for downloaded and generated media.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A file that is deleted when dropped.
///
/// Every media download in a pipeline run goes through one of these, so the
/// file disappears on success, on provider failure and on early return alike.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Scratch path under `dir` with a filesystem-safe name.
    pub fn in_dir(dir: &Path, stem: &str, extension: &str) -> Self {
        Self::new(dir.join(format!("{}.{}", sanitize(stem), extension)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("🧹 Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clean up {}: {e}", self.path.display()),
        }
    }
}

/// Keep ids like `77011234567@c.us_BAE5...` usable as file names.
fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
