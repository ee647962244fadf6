use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories_next::{BaseDirs, ProjectDirs};

const CONFIG_DIR_ENV: &str = "MQCLOUD_CONFIG_DIR";
const CACHE_DIR_ENV: &str = "MQCLOUD_CACHE_DIR";

const CREDENTIAL_FILE: &str = ".mqcloudrc";
const LEGACY_CREDENTIAL_FILE: &str = ".mqcloud";

/// Best-effort home directory resolution.
///
/// `BaseDirs` can come up empty in some service/test environments, so fall
/// back to the usual environment variables.
pub fn user_home_dir() -> Option<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .or_else(|| env::var_os("HOME").map(PathBuf::from))
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}

/// Path of the structured credential file (`~/.mqcloudrc`).
pub fn credential_file_path() -> Result<PathBuf> {
    if let Ok(value) = env::var(CONFIG_DIR_ENV) {
        return Ok(Path::new(&value).join(CREDENTIAL_FILE));
    }
    let home = user_home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(CREDENTIAL_FILE))
}

/// Path of the legacy single-key file (`~/.mqcloud`), migrated away on first load.
pub fn legacy_credential_file_path() -> Result<PathBuf> {
    if let Ok(value) = env::var(CONFIG_DIR_ENV) {
        return Ok(Path::new(&value).join(LEGACY_CREDENTIAL_FILE));
    }
    let home = user_home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(LEGACY_CREDENTIAL_FILE))
}

/// Directory holding the shell-completion cache files.
pub fn completion_cache_dir() -> Result<PathBuf> {
    if let Ok(value) = env::var(CACHE_DIR_ENV) {
        return Ok(PathBuf::from(value));
    }
    let dirs = ProjectDirs::from("", "", "mqcloud")
        .ok_or_else(|| anyhow!("unable to determine cache directory"))?;
    Ok(dirs.cache_dir().to_path_buf())
}
