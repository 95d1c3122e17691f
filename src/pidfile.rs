//! PID file guarding against a second proxy on the same file

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("pidfile {path} is held by running process {pid}")]
    AlreadyRunning { path: PathBuf, pid: u32 },
    #[error("failed to write pidfile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A PID file that is removed when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    removed: bool,
}

impl PidFile {
    /// Write the current PID to `path`
    ///
    /// Fails if the file names a live process. A stale or malformed file is
    /// overwritten.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PidFileError> {
        let path = path.as_ref().to_path_buf();

        if let Ok(content) = std::fs::read_to_string(&path) {
            match content.trim().parse::<u32>() {
                Ok(pid) if process_alive(pid) => {
                    return Err(PidFileError::AlreadyRunning { path, pid });
                }
                Ok(pid) => {
                    warn!(path = %path.display(), pid, "Stale pidfile found, overwriting");
                }
                Err(_) => {
                    warn!(path = %path.display(), "Malformed pidfile found, overwriting");
                }
            }
        }

        std::fs::write(&path, std::process::id().to_string()).map_err(|source| PidFileError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = std::fs::remove_file(&self.path) {
            error!(path = %self.path.display(), error = %e, "Failed to remove pidfile");
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}
