//! Initial tree build: scenarios 1 and 2, idempotence and partial failure.

use config_fs::kv::KvStore;
use config_fs::LifecycleState;

use crate::integration::Harness;

#[tokio::test]
async fn test_empty_store_creates_mount_only() {
    let h = Harness::new();
    assert!(!h.mount.exists());

    let handle = h.store.synchronize().await.unwrap();
    assert!(h.mount.is_dir());
    assert!(h.mirror_tree().is_empty());
    assert_eq!(h.store.stats().files_written, 0);

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_directory_and_leaf_are_mirrored() {
    let h = Harness::new();
    h.kv.mkdir("/app").await.unwrap();
    h.kv.set("/app/config", "v1").await.unwrap();

    let handle = h.store.synchronize().await.unwrap();
    assert!(h.path("/app").is_dir());
    assert_eq!(h.read("/app/config").as_deref(), Some("v1"));

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_presync_mirrors_whole_tree() {
    let h = Harness::new();
    h.kv.set("/a/b/c/d", "deep").await.unwrap();
    h.kv.set("/a/leaf", "1").await.unwrap();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/svc/conf", r#"$TEMPLATE$host={{ getv "/db/host" }}"#)
        .await
        .unwrap();
    h.kv.mkdir("/empty/dir").await.unwrap();

    let handle = h.store.synchronize().await.unwrap();

    let mut expected = h.kv_tree().await;
    expected.insert("/svc/conf".to_string(), Some("host=db1".to_string()));
    assert_eq!(h.mirror_tree(), expected);
    assert!(h.is_dynamic("/svc/conf"));
    assert!(!h.is_dynamic("/a/leaf"));

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_without_presync_mirror_starts_empty() {
    let h = Harness::with_config(|config| config.pre_sync = false);
    h.kv.set("/app/config", "v1").await.unwrap();

    let handle = h.store.synchronize().await.unwrap();
    assert!(h.mount.is_dir());
    assert!(h.read("/app/config").is_none());
    assert_eq!(h.store.state(), LifecycleState::Running);

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let h = Harness::new();
    h.kv.set("/app/config", "v1").await.unwrap();
    h.kv.set("/app/other", "v2").await.unwrap();
    h.kv.set("/tpl", "$TEMPLATE$static").await.unwrap();

    let handle = h.store.synchronize().await.unwrap();
    h.store.close();
    handle.wait().await.unwrap();
    let before = h.mirror_tree();
    let written = h.store.stats().files_written;
    assert_eq!(written, 3);

    let again = Harness::with_config(|config| config.mount_point = h.mount.clone());
    again.kv.set("/app/config", "v1").await.unwrap();
    again.kv.set("/app/other", "v2").await.unwrap();
    again.kv.set("/tpl", "$TEMPLATE$static").await.unwrap();
    let handle = again.store.synchronize().await.unwrap();
    again.store.close();
    handle.wait().await.unwrap();

    assert_eq!(again.mirror_tree(), before);
    assert_eq!(again.store.stats().files_written, 0);
    assert_eq!(again.store.stats().files_unchanged, 3);
}

#[tokio::test]
async fn test_failing_leaf_does_not_abort_build() {
    let h = Harness::new();
    h.kv.set("/app/broken", r#"$TEMPLATE${{ getv "/nowhere" }}"#)
        .await
        .unwrap();
    h.kv.set("/app/fine", "ok").await.unwrap();
    h.kv.set("/zzz", "last").await.unwrap();

    let handle = h.store.synchronize().await.unwrap();
    assert_eq!(h.read("/app/fine").as_deref(), Some("ok"));
    assert_eq!(h.read("/zzz").as_deref(), Some("last"));
    assert!(h.read("/app/broken").is_none());
    assert!(!h.is_dynamic("/app/broken"));

    h.store.close();
    handle.wait().await.unwrap();
}
