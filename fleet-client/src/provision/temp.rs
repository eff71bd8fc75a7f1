//! Scoped temporary path for an in-flight OS image.

use std::future::Future;
use std::io;
use std::path::Path;

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::ProvisionError;

/// Owns a unique temporary path. The path is removed by [`TempImage::release`]
/// or, failing that, when the guard is dropped.
#[derive(Debug)]
pub struct TempImage {
    path: TempPath,
}

impl TempImage {
    pub fn acquire() -> io::Result<Self> {
        Self::acquire_named("fleet-image-", ".img")
    }

    fn acquire_named(prefix: &str, suffix: &str) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile()?;
        let path = file.into_temp_path();
        debug!("Allocated temporary image path {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the backing path now. A path already gone counts as released.
    pub fn release(self) -> io::Result<()> {
        let shown = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => {
                debug!("Removed temporary image path {}", shown);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove temporary image {}: {}", shown, e);
                Err(e)
            }
        }
    }
}

/// Run `body` with a fresh temporary path that is removed however `body` ends.
pub async fn with_temp_path<F, Fut, T>(body: F) -> Result<T, ProvisionError>
where
    F: FnOnce(&Path) -> Fut,
    Fut: Future<Output = Result<T, ProvisionError>>,
{
    let scratch = TempImage::acquire_named("fleet-", ".tmp")
        .map_err(|e| ProvisionError::io("failed to allocate temporary path", e))?;
    let result = body(scratch.path()).await;
    let released = scratch.release();
    let value = result?;
    released.map_err(|e| ProvisionError::io("failed to remove temporary path", e))?;
    Ok(value)
}
