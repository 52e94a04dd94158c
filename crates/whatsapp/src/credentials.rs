//! On-disk credential material kept by the sidecar.

use std::{
    io,
    path::{Path, PathBuf},
};

use {
    rukun_channels::{Error, Result},
    tracing::{debug, info},
};

/// Resolve the configured auth directory against the working directory.
pub fn resolve_auth_dir(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}

/// Directory holding one session's credentials.
pub fn session_dir(auth_dir: &Path, session_name: &str) -> PathBuf {
    auth_dir.join(format!("session-{session_name}"))
}

/// Delete a session's credentials. A missing directory counts as deleted.
///
/// Errors that mean another process still holds the files (busy, permission
/// denied) become [`Error::CredentialsBusy`] so callers can retry.
pub async fn discard(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            info!(path = %dir.display(), "session credentials deleted");
            Ok(())
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), "no session credentials to delete");
            Ok(())
        },
        Err(e) if is_busy(&e) => Err(Error::credentials_busy(format!("{}: {e}", dir.display()))),
        Err(e) => Err(Error::external(
            format!("failed to delete {}", dir.display()),
            e,
        )),
    }
}

fn is_busy(e: &io::Error) -> bool {
    const EBUSY: i32 = 16;
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    ) || e.raw_os_error() == Some(EBUSY)
}
