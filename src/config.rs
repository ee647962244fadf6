use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::paths;
use crate::secret_input;

const APIKEY_ENV: &str = "MQCLOUD_APIKEY";

/// On-disk shape of `~/.mqcloudrc`. Empty fields are omitted when written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_keys: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error(
        "instance API key not found for instance {0}. Run 'mqcloud instance get {0}' to retrieve and store it"
    )]
    InstanceKeyNotFound(String),
}

/// Outcome of the one-shot legacy-file migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    NotNeeded,
    Migrated,
}

/// Resolves and persists API keys for the main account and per-instance
/// scopes. Paths are explicit so tests (and callers) never depend on
/// process-global state.
pub struct CredentialStore {
    credential_path: PathBuf,
    legacy_path: PathBuf,
}

impl CredentialStore {
    pub fn default_locations() -> Result<Self> {
        Ok(Self {
            credential_path: paths::credential_file_path()?,
            legacy_path: paths::legacy_credential_file_path()?,
        })
    }

    pub fn with_paths(credential_path: PathBuf, legacy_path: PathBuf) -> Self {
        Self {
            credential_path,
            legacy_path,
        }
    }

    pub fn credential_path(&self) -> &PathBuf {
        &self.credential_path
    }

    /// Resolve the main account key: environment, then credential file, then
    /// an interactive prompt whose answer is persisted for next time.
    pub fn main_api_key(&self) -> Result<String> {
        if let Some(key) = env_key(APIKEY_ENV) {
            return Ok(key);
        }

        if let Ok(credentials) = self.load_after_migration() {
            if let Some(key) = credentials.main_api_key.filter(|key| !key.is_empty()) {
                return Ok(key);
            }
        }

        let key = secret_input::read_secret("MQCloud API key not found. Please enter your API key: ")?;
        match self.save_main_api_key(&key) {
            Ok(()) => println!("API key saved to {}", self.credential_path.display()),
            // The key is still usable for this invocation.
            Err(err) => warn!("failed to save API key to credential file: {err:#}"),
        }
        Ok(key)
    }

    /// Resolve the key for one instance: environment, then credential file.
    /// Instance keys are provider-issued, so there is no interactive fallback.
    pub fn instance_api_key(&self, instance_id: &str) -> Result<String, CredentialError> {
        let env_name = format!("MQCLOUD_INSTANCE_{instance_id}_APIKEY");
        if let Some(key) = env_key(&env_name) {
            return Ok(key);
        }

        if let Ok(credentials) = self.load_after_migration() {
            if let Some(key) = credentials
                .instance_keys
                .get(instance_id)
                .filter(|key| !key.is_empty())
            {
                return Ok(key.clone());
            }
        }

        Err(CredentialError::InstanceKeyNotFound(instance_id.to_string()))
    }

    /// Main-key lookup for completion callbacks: never prompts.
    pub fn stored_main_key(&self) -> Option<String> {
        if let Some(key) = env_key(APIKEY_ENV) {
            return Some(key);
        }
        self.load_after_migration()
            .ok()
            .and_then(|credentials| credentials.main_api_key)
            .filter(|key| !key.is_empty())
    }

    pub fn save_main_api_key(&self, api_key: &str) -> Result<()> {
        let mut credentials = self.load_after_migration().unwrap_or_default();
        credentials.main_api_key = Some(api_key.to_string());
        self.write(&credentials)
    }

    pub fn save_instance_api_key(&self, instance_id: &str, api_key: &str) -> Result<()> {
        let mut credentials = self.load_after_migration().unwrap_or_default();
        credentials
            .instance_keys
            .insert(instance_id.to_string(), api_key.to_string());
        self.write(&credentials)
    }

    /// One-shot migration of the legacy bare-key file into the structured
    /// record. Explicitly invoked before the first load of a process; `load`
    /// itself never migrates.
    pub fn migrate_legacy(&self) -> Result<MigrationOutcome> {
        if !self.legacy_path.exists() {
            return Ok(MigrationOutcome::NotNeeded);
        }
        let raw = fs::read_to_string(&self.legacy_path)
            .with_context(|| format!("read legacy credential file {}", self.legacy_path.display()))?;
        let key = raw.trim();
        if key.is_empty() {
            bail!("legacy credential file {} is empty", self.legacy_path.display());
        }
        let credentials = Credentials {
            main_api_key: Some(key.to_string()),
            instance_keys: BTreeMap::new(),
        };
        self.write(&credentials)
            .context("write migrated credential file")?;
        fs::remove_file(&self.legacy_path)
            .with_context(|| format!("remove legacy credential file {}", self.legacy_path.display()))?;
        Ok(MigrationOutcome::Migrated)
    }

    pub fn load(&self) -> Result<Credentials> {
        let contents = fs::read_to_string(&self.credential_path)
            .with_context(|| format!("read credential file {}", self.credential_path.display()))?;
        let credentials: Credentials = serde_json::from_str(&contents)
            .with_context(|| format!("parse credential file {}", self.credential_path.display()))?;
        Ok(credentials)
    }

    fn load_after_migration(&self) -> Result<Credentials> {
        match self.migrate_legacy() {
            Ok(MigrationOutcome::Migrated) => {
                info!(path = %self.credential_path.display(), "migrated legacy credential file");
            }
            Ok(MigrationOutcome::NotNeeded) => {}
            Err(err) => warn!("failed to migrate legacy credential file: {err:#}"),
        }
        self.load()
    }

    /// Whole-file overwrite; merging happens in memory before the call.
    fn write(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.credential_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(credentials)?;
        fs::write(&self.credential_path, contents)
            .with_context(|| format!("write credential file {}", self.credential_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perm = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.credential_path, perm)?;
        }
        debug!(path = %self.credential_path.display(), "credential file written");
        Ok(())
    }
}

fn env_key(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &std::path::Path) -> CredentialStore {
        CredentialStore::with_paths(dir.join(".mqcloudrc"), dir.join(".mqcloud"))
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save_main_api_key("main-secret").unwrap();
        store.save_instance_api_key("1234", "instance-secret").unwrap();

        let credentials = store.load().unwrap();
        assert_eq!(credentials.main_api_key.as_deref(), Some("main-secret"));
        assert_eq!(
            credentials.instance_keys.get("1234").map(String::as_str),
            Some("instance-secret")
        );
    }

    #[test]
    fn saving_instance_key_keeps_main_key() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save_main_api_key("main-secret").unwrap();
        store.save_instance_api_key("77", "other").unwrap();

        let credentials = store.load().unwrap();
        assert_eq!(credentials.main_api_key.as_deref(), Some("main-secret"));
        assert_eq!(credentials.instance_keys.len(), 1);
    }

    #[test]
    fn empty_fields_are_omitted_on_disk() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save_main_api_key("main-secret").unwrap();

        let raw = fs::read_to_string(store.credential_path()).unwrap();
        assert!(raw.contains("main_api_key"));
        assert!(!raw.contains("instance_keys"));
    }

    #[test]
    fn legacy_file_migrates_once() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(dir.path().join(".mqcloud"), "abc123\n").unwrap();

        assert_eq!(store.migrate_legacy().unwrap(), MigrationOutcome::Migrated);
        assert!(!dir.path().join(".mqcloud").exists());
        let credentials = store.load().unwrap();
        assert_eq!(credentials.main_api_key.as_deref(), Some("abc123"));
        assert!(credentials.instance_keys.is_empty());

        assert_eq!(store.migrate_legacy().unwrap(), MigrationOutcome::NotNeeded);
    }

    #[test]
    fn empty_legacy_file_is_a_migration_error() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(dir.path().join(".mqcloud"), "  \n").unwrap();

        assert!(store.migrate_legacy().is_err());
        // The broken legacy file stays put so the user can inspect it.
        assert!(dir.path().join(".mqcloud").exists());
    }

    #[test]
    fn instance_key_resolution_falls_back_through_legacy_migration() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(dir.path().join(".mqcloud"), "legacy-main\n").unwrap();

        // A legacy file carries no instance keys, so lookup still fails, but
        // the migration must have happened along the way.
        let err = store.instance_api_key("555").unwrap_err();
        assert!(err.to_string().contains("555"));
        assert_eq!(
            store.load().unwrap().main_api_key.as_deref(),
            Some("legacy-main")
        );
    }

    #[test]
    fn missing_instance_key_names_the_instance() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save_main_api_key("main-secret").unwrap();

        let err = store.instance_api_key("4242").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("4242"));
        assert!(message.contains("instance get"));
    }

    #[test]
    fn corrupt_credential_file_does_not_panic_resolution() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(dir.path().join(".mqcloudrc"), "{not json").unwrap();

        assert!(store.load().is_err());
        assert!(store.stored_main_key().is_none());
        assert!(store.instance_api_key("1").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn credential_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save_main_api_key("main-secret").unwrap();

        let mode = fs::metadata(store.credential_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
