//! Engine lifecycle: startup failures, shutdown drain, delete-on-exit and observation of the
//! mount point.

use config_fs::kv::KvStore;
use config_fs::sync::ConfigurationStore;
use config_fs::{LifecycleState, SyncConfig, SyncError};
use tempfile::TempDir;

use crate::integration::{eventually, Harness};

#[tokio::test]
async fn test_unsupported_backend_is_a_configuration_error() {
    let temp = TempDir::new().unwrap();
    let config = SyncConfig {
        mount_point: temp.path().join("mnt"),
        store_url: "zookeeper://localhost:2181".to_string(),
        ..Default::default()
    };
    let result = ConfigurationStore::new(config).await;
    assert!(matches!(result, Err(SyncError::Configuration(_))));
}

#[tokio::test]
async fn test_root_mount_point_is_a_configuration_error() {
    let config = SyncConfig {
        mount_point: "/".into(),
        store_url: "memory://".to_string(),
        delete_on_exit: true,
        ..Default::default()
    };
    let result = ConfigurationStore::new(config).await;
    assert!(matches!(result, Err(SyncError::Configuration(_))));
}

#[tokio::test]
async fn test_memory_backend_from_configuration() {
    let temp = TempDir::new().unwrap();
    let config = SyncConfig {
        mount_point: temp.path().join("mnt"),
        store_url: "memory://".to_string(),
        interval_secs: 0,
        watch_mount: false,
        ..Default::default()
    };
    let store = ConfigurationStore::new(config).await.unwrap();
    store.kv_store().set("/app/config", "v1").await.unwrap();

    let handle = store.synchronize().await.unwrap();
    let file = store.mount_point().full_path("/app/config");
    assert_eq!(std::fs::read_to_string(file).unwrap(), "v1");

    store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_uncreatable_mount_point_aborts_startup() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, "x").unwrap();

    let h = Harness::with_config(|config| config.mount_point = blocker.join("mnt"));
    let result = h.store.synchronize().await;
    assert!(matches!(result, Err(SyncError::Path(_))));
    assert_eq!(h.store.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_shutdown_drains_accepted_events() {
    let h = Harness::new();
    let handle = h.store.synchronize().await.unwrap();

    for i in 0..50 {
        h.kv.set(&format!("/bulk{}/item", i % 5), &format!("{}", i))
            .await
            .unwrap();
    }
    h.store.close();
    handle.wait().await.unwrap();
    assert_eq!(h.store.state(), LifecycleState::Stopped);
    assert_eq!(h.store.stats().node_events, 50);
    for i in 45..50 {
        assert_eq!(
            h.read(&format!("/bulk{}/item", i % 5)).as_deref(),
            Some(i.to_string().as_str())
        );
    }
}

#[tokio::test]
async fn test_delete_on_exit_removes_mirror() {
    let h = Harness::with_config(|config| config.delete_on_exit = true);
    h.kv.set("/app/config", "v1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();
    assert!(h.path("/app/config").is_file());

    h.store.close();
    handle.wait().await.unwrap();
    assert!(!h.mount.exists());
    assert!(h.store.mirror_index().is_empty());
}

#[tokio::test]
async fn test_mirror_survives_exit_by_default() {
    let h = Harness::new();
    h.kv.set("/app/config", "v1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();

    h.store.close();
    handle.wait().await.unwrap();
    assert_eq!(h.read("/app/config").as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_explicit_delete_configuration() {
    let h = Harness::new();
    h.kv.set("/app/config", "$TEMPLATE$rendered").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();
    assert!(h.is_dynamic("/app/config"));

    h.store.delete_configuration().unwrap();
    assert!(!h.mount.exists());
    assert!(!h.is_dynamic("/app/config"));

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_close_is_non_blocking_and_repeatable() {
    let h = Harness::new();
    let handle = h.store.synchronize().await.unwrap();
    let mut states = h.store.state_changes();

    h.store.close();
    h.store.close();
    h.store.close();
    handle.wait().await.unwrap();
    states
        .wait_for(|state| *state == LifecycleState::Stopped)
        .await
        .unwrap();

    // closing a stopped engine is harmless
    h.store.close();
}

#[tokio::test]
async fn test_mount_notifications_are_observed_only() {
    let h = Harness::with_config(|config| config.watch_mount = true);
    h.kv.set("/app/config", "v1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();

    std::fs::write(h.path("/app/config"), "edited locally").unwrap();
    std::fs::write(h.path("/stray"), "x").unwrap();

    let h_ref = &h;
    eventually("notifications observed", || async move {
        h_ref.store.stats().fs_events > 0
    })
    .await;
    assert_eq!(h.read("/app/config").as_deref(), Some("edited locally"));
    assert_eq!(h.kv.get("/app/config").await.unwrap().value, "v1");
    assert!(h.kv.get("/stray").await.is_err());

    h.store.close();
    handle.wait().await.unwrap();
}
