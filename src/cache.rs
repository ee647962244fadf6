use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::paths;

/// Plans and regions rarely change; instances and VPCs do.
pub const PLANS_TTL: Duration = Duration::from_secs(60 * 60);
pub const REGIONS_TTL: Duration = Duration::from_secs(60 * 60);
pub const INSTANCES_TTL: Duration = Duration::from_secs(60);
pub const VPCS_TTL: Duration = Duration::from_secs(60);

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    data: Value,
    timestamp: i64,
}

/// TTL-bounded snapshot cache for shell-completion candidates.
///
/// One file per resource key; the filename embeds the TTL encoding, so a
/// changed TTL simply orphans the old file. Every read/parse/expiry failure
/// is a miss and the caller falls back to a live fetch.
pub struct CompletionCache {
    dir: PathBuf,
}

impl CompletionCache {
    pub fn open() -> Result<Self> {
        Ok(Self {
            dir: paths::completion_cache_dir()?,
        })
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        self.get_at(key, ttl, Utc::now().timestamp())
    }

    fn get_at(&self, key: &str, ttl: Duration, now: i64) -> Option<Value> {
        let raw = fs::read_to_string(self.entry_path(key, ttl)).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        if now - entry.timestamp > ttl.as_secs() as i64 {
            return None;
        }
        Some(entry.data)
    }

    /// Overwrite the snapshot for `key` wholesale, stamped with the current
    /// time. Callers treat failures as "uncached for this invocation".
    pub fn set(&self, key: &str, ttl: Duration, data: &impl Serialize) -> Result<()> {
        self.set_at(key, ttl, data, Utc::now().timestamp())
    }

    fn set_at(&self, key: &str, ttl: Duration, data: &impl Serialize, now: i64) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache directory {}", self.dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perm = fs::Permissions::from_mode(0o700);
            fs::set_permissions(&self.dir, perm)?;
        }
        let entry = CacheEntry {
            data: serde_json::to_value(data)?,
            timestamp: now,
        };
        let path = self.entry_path(key, ttl);
        fs::write(&path, serde_json::to_string(&entry)?)
            .with_context(|| format!("write cache file {}", path.display()))?;
        Ok(())
    }

    fn entry_path(&self, key: &str, ttl: Duration) -> PathBuf {
        self.dir.join(format!("cache_{}_ttl_{}.json", format_ttl(ttl), key))
    }
}

/// Short TTL encoding used in cache filenames.
///
/// Exactly 24 hours stays "24h" rather than "1d"; existing cache files were
/// written with that name, so keep it.
pub fn format_ttl(ttl: Duration) -> String {
    let hours = ttl.as_secs() / 3600;
    if hours >= 24 {
        let days = hours / 24;
        if days == 1 {
            return "24h".to_string();
        }
        return format!("{days}d");
    }
    if hours > 0 {
        return format!("{hours}h");
    }
    format!("{}m", ttl.as_secs() / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn ttl_encoding_matches_historical_filenames() {
        assert_eq!(format_ttl(Duration::from_secs(24 * 3600)), "24h");
        assert_eq!(format_ttl(Duration::from_secs(48 * 3600)), "2d");
        assert_eq!(format_ttl(Duration::from_secs(90 * 60)), "1h");
        assert_eq!(format_ttl(Duration::from_secs(30 * 60)), "30m");
        assert_eq!(format_ttl(Duration::from_secs(72 * 3600)), "3d");
        assert_eq!(format_ttl(Duration::from_secs(45)), "0m");
    }

    #[test]
    fn filename_embeds_ttl_and_key() {
        let cache = CompletionCache::with_dir("/tmp/unused");
        let path = cache.entry_path("plans", PLANS_TTL);
        assert_eq!(path.file_name().unwrap(), "cache_1h_ttl_plans.json");
    }

    #[test]
    fn set_then_get_hits() {
        let dir = tempdir().unwrap();
        let cache = CompletionCache::with_dir(dir.path());
        let payload = json!([{"id": 1, "name": "broker-a"}]);
        cache.set("instances", INSTANCES_TTL, &payload).unwrap();

        let got = cache.get("instances", INSTANCES_TTL).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let dir = tempdir().unwrap();
        let cache = CompletionCache::with_dir(dir.path());
        let payload = json!(["us-east-1"]);
        let stored_at = Utc::now().timestamp();
        cache
            .set_at("regions", REGIONS_TTL, &payload, stored_at)
            .unwrap();

        let just_inside = stored_at + REGIONS_TTL.as_secs() as i64;
        assert!(cache.get_at("regions", REGIONS_TTL, just_inside).is_some());

        let just_past = stored_at + REGIONS_TTL.as_secs() as i64 + 1;
        assert!(cache.get_at("regions", REGIONS_TTL, just_past).is_none());
    }

    #[test]
    fn set_overwrites_previous_snapshot() {
        let dir = tempdir().unwrap();
        let cache = CompletionCache::with_dir(dir.path());
        cache.set("vpcs", VPCS_TTL, &json!(["old"])).unwrap();
        cache.set("vpcs", VPCS_TTL, &json!(["new"])).unwrap();

        assert_eq!(cache.get("vpcs", VPCS_TTL).unwrap(), json!(["new"]));
    }

    #[test]
    fn unreadable_or_corrupt_entries_are_misses() {
        let dir = tempdir().unwrap();
        let cache = CompletionCache::with_dir(dir.path());
        assert!(cache.get("plans", PLANS_TTL).is_none());

        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("cache_1h_ttl_plans.json"), "{broken").unwrap();
        assert!(cache.get("plans", PLANS_TTL).is_none());
    }

    #[test]
    fn changed_ttl_orphans_the_old_file() {
        let dir = tempdir().unwrap();
        let cache = CompletionCache::with_dir(dir.path());
        cache.set("plans", PLANS_TTL, &json!(["a"])).unwrap();

        // Same key under a different TTL resolves to a different file.
        assert!(cache.get("plans", Duration::from_secs(2 * 3600)).is_none());
        assert!(cache.get("plans", PLANS_TTL).is_some());
    }
}
