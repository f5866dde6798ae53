//! Live change scenarios: template promotion, dynamic delete and an idle forced resync.

use config_fs::kv::KvStore;

use crate::integration::{eventually, Harness};

#[tokio::test]
async fn test_value_promoted_to_template_is_rendered_and_registered() {
    let h = Harness::new();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/app/config", "v1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();
    assert_eq!(h.read("/app/config").as_deref(), Some("v1"));
    assert!(!h.is_dynamic("/app/config"));

    h.kv.set("/app/config", r#"$TEMPLATE$host={{ getv "/db/host" }}"#)
        .await
        .unwrap();

    let h_ref = &h;
    eventually("template rendered into the mirror", || async move {
        h_ref.read("/app/config").as_deref() == Some("host=db1")
    })
    .await;
    assert!(h.is_dynamic("/app/config"));

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_deleted_dynamic_path_is_unregistered() {
    let h = Harness::new();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/app/config", r#"$TEMPLATE${{ getv "/db/host" }}"#)
        .await
        .unwrap();
    let handle = h.store.synchronize().await.unwrap();
    assert!(h.is_dynamic("/app/config"));
    assert_eq!(h.read("/app/config").as_deref(), Some("db1"));

    h.kv.delete("/app/config").await.unwrap();

    let h_ref = &h;
    eventually("mirrored file removed", || async move {
        !h_ref.path("/app/config").exists()
    })
    .await;
    assert!(!h.is_dynamic("/app/config"));
    assert_eq!(h.kv.watch_count(), 1);

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_idle_resync_changes_nothing() {
    let h = Harness::with_config(|config| config.interval_secs = 1);
    h.kv.set("/app/config", "v1").await.unwrap();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/tpl", r#"$TEMPLATE${{ getv "/db/host" }}"#)
        .await
        .unwrap();
    let handle = h.store.synchronize().await.unwrap();
    let before = h.mirror_tree();
    let written = h.store.stats().files_written;
    let modified = std::fs::metadata(h.path("/app/config"))
        .unwrap()
        .modified()
        .unwrap();

    let h_ref = &h;
    eventually("a forced resync completed", || async move {
        h_ref.store.stats().resyncs >= 1
    })
    .await;

    let stats = h.store.stats();
    assert_eq!(stats.files_written, written);
    assert_eq!(stats.handler_failures, 0);
    assert_eq!(stats.pruned, 0);
    assert!(stats.last_resync.is_some());
    assert_eq!(h.mirror_tree(), before);
    let after = std::fs::metadata(h.path("/app/config"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(after, modified);

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_dependency_change_rerenders_template() {
    let h = Harness::new();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/app/config", r#"$TEMPLATE$host={{ getv "/db/host" }}"#)
        .await
        .unwrap();
    let handle = h.store.synchronize().await.unwrap();

    h.kv.set("/db/host", "db2").await.unwrap();

    let h_ref = &h;
    eventually("template re-rendered after its key changed", || async move {
        h_ref.read("/app/config").as_deref() == Some("host=db2")
    })
    .await;
    assert_eq!(h.read("/db/host").as_deref(), Some("db2"));
    assert!(h.store.stats().template_events >= 1);

    h.store.close();
    handle.wait().await.unwrap();
}
