use log::{debug, info};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

use crate::error_handling::types::SessionError;

/// Private per-session directory holding an isolated copy of the user's data.
///
/// The directory is created with owner-only permissions. It is deleted by
/// [`WorkingArea::remove`], or when the value is dropped on an error path.
#[derive(Debug)]
pub struct WorkingArea {
    dir: TempDir,
}

impl WorkingArea {
    /// Creates a fresh directory under `parent`, or under the system temp dir.
    pub fn create(parent: Option<&Path>, session_id: &Uuid) -> std::io::Result<Self> {
        let prefix = format!("dashboard_session_{}_", session_id.simple());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // The umask may leave the directory group or world readable
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;
        }
        debug!("Created working area {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copies `source` into the working area under its own file name.
    ///
    /// Fails with [`SessionError::NoDataAvailable`] when the source is missing.
    pub async fn seed_from(&self, source: &Path) -> Result<PathBuf, SessionError> {
        let file_name = source.file_name().ok_or(SessionError::NoDataAvailable)?;
        match tokio::fs::metadata(source).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return Err(SessionError::NoDataAvailable),
        }

        let target = self.path().join(file_name);
        let bytes = tokio::fs::copy(source, &target).await?;
        info!(
            "Copied {} ({} bytes) into {}",
            source.display(),
            bytes,
            self.path().display()
        );
        Ok(target)
    }

    /// Deletes the directory and everything in it.
    pub fn remove(self) -> std::io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed working area {}", path.display());
        Ok(())
    }
}
