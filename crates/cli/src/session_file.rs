// Saved login for the CLI: `~/.murmur/session.toml`.
//
// Holds the relay URL and the bearer token from the last `murmur login`.
// The file is owner-only on unix since the token is a credential.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Overrides the default session file location.
pub const SESSION_FILE_ENV: &str = "MURMUR_SESSION_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Relay base URL the token was issued by.
    pub server: String,
    pub token: String,
}

/// Root directory for murmur CLI state: `~/.murmur/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".murmur"))
}

pub fn default_session_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(SESSION_FILE_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    global_dir().map(|d| d.join("session.toml"))
}

/// Returns `Ok(None)` when no session has been saved yet.
pub fn load(path: &Path) -> Result<Option<StoredSession>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read session file `{}`", path.display()))?;
    let session = toml::from_str(&raw)
        .with_context(|| format!("failed to parse session file `{}`", path.display()))?;
    Ok(Some(session))
}

pub fn save(path: &Path, session: &StoredSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create `{}`", parent.display()))?;
        ensure_owner_only(parent, 0o700)?;
    }

    let raw = toml::to_string_pretty(session).context("failed to serialize session")?;
    fs::write(path, raw)
        .with_context(|| format!("failed to write session file `{}`", path.display()))?;
    ensure_owner_only(path, 0o600)
}

fn ensure_owner_only(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
        if metadata.permissions().mode() & 0o777 != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set owner-only mode on `{}`", path.display()))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}
