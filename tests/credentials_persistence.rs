use std::sync::{Mutex, OnceLock};

use mqcloud_cli::config::CredentialStore;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}

#[test]
fn save_and_load_roundtrip_through_default_locations() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("MQCLOUD_CONFIG_DIR", temp.path());
    }

    let store = CredentialStore::default_locations().unwrap();
    store.save_main_api_key("main-key").unwrap();
    store.save_instance_api_key("1234", "instance-key").unwrap();

    let reopened = CredentialStore::default_locations().unwrap();
    let credentials = reopened.load().unwrap();
    assert_eq!(credentials.main_api_key.as_deref(), Some("main-key"));
    assert_eq!(
        credentials.instance_keys.get("1234").map(String::as_str),
        Some("instance-key")
    );

    unsafe {
        std::env::remove_var("MQCLOUD_CONFIG_DIR");
    }
}

#[test]
fn environment_beats_stored_instance_key() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("MQCLOUD_CONFIG_DIR", temp.path());
        std::env::set_var("MQCLOUD_INSTANCE_2468_APIKEY", "env-key");
    }

    let store = CredentialStore::default_locations().unwrap();
    store.save_instance_api_key("2468", "file-key").unwrap();

    assert_eq!(store.instance_api_key("2468").unwrap(), "env-key");

    unsafe {
        std::env::remove_var("MQCLOUD_INSTANCE_2468_APIKEY");
    }
    assert_eq!(store.instance_api_key("2468").unwrap(), "file-key");

    unsafe {
        std::env::remove_var("MQCLOUD_CONFIG_DIR");
    }
}

#[test]
fn environment_beats_stored_main_key() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("MQCLOUD_CONFIG_DIR", temp.path());
        std::env::set_var("MQCLOUD_APIKEY", "env-main-key");
    }

    let store = CredentialStore::default_locations().unwrap();
    store.save_main_api_key("file-main-key").unwrap();

    // main_api_key would also work here, but stored_main_key covers the
    // never-prompting completion path with identical precedence.
    assert_eq!(store.stored_main_key().as_deref(), Some("env-main-key"));

    unsafe {
        std::env::remove_var("MQCLOUD_APIKEY");
    }
    assert_eq!(store.stored_main_key().as_deref(), Some("file-main-key"));

    unsafe {
        std::env::remove_var("MQCLOUD_CONFIG_DIR");
    }
}

#[test]
fn legacy_file_migrates_on_resolution() {
    let _guard = lock();
    let temp = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("MQCLOUD_CONFIG_DIR", temp.path());
    }

    std::fs::write(temp.path().join(".mqcloud"), "abc123\n").unwrap();

    let store = CredentialStore::default_locations().unwrap();
    // Any resolution path runs the one-shot migration first.
    assert_eq!(store.stored_main_key().as_deref(), Some("abc123"));
    assert!(!temp.path().join(".mqcloud").exists());
    assert!(temp.path().join(".mqcloudrc").exists());

    unsafe {
        std::env::remove_var("MQCLOUD_CONFIG_DIR");
    }
}
