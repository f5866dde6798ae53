//! Live reconciliation: convergence, directory deletes, delete-then-recreate and failure
//! containment.

use config_fs::kv::KvStore;

use crate::integration::{eventually, Harness};

#[tokio::test]
async fn test_mutation_sequence_converges() {
    let h = Harness::new();
    h.kv.set("/seed/a", "1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();

    for i in 0..20 {
        h.kv.set(&format!("/svc{}/conf", i % 4), &format!("v{}", i))
            .await
            .unwrap();
    }
    h.kv.set("/seed/b/c", "nested").await.unwrap();
    h.kv.delete("/seed/a").await.unwrap();
    h.kv.mkdir("/fresh/dir").await.unwrap();
    h.kv.remove_path("/svc3").await.unwrap();
    h.kv.set("/svc3/conf", "back").await.unwrap();
    h.kv.set("/svc0/conf", "final").await.unwrap();

    let h_ref = &h;
    eventually("mirror matches the key/value tree", || async move {
        h_ref.kv_tree().await == h_ref.mirror_tree()
    })
    .await;
    assert_eq!(h.read("/svc0/conf").as_deref(), Some("final"));
    assert_eq!(h.read("/svc3/conf").as_deref(), Some("back"));
    assert!(h.path("/fresh/dir").is_dir());
    assert!(!h.path("/seed/a").exists());

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_directory_delete_removes_subtree_and_registrations() {
    let h = Harness::new();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/app/plain", "p").await.unwrap();
    h.kv.set("/app/nested/deep", "d").await.unwrap();
    h.kv.set("/app/nested/tpl", r#"$TEMPLATE${{ getv "/db/host" }}"#)
        .await
        .unwrap();
    h.kv.set("/apple", "kept").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();
    assert!(h.is_dynamic("/app/nested/tpl"));

    h.kv.remove_path("/app").await.unwrap();

    let h_ref = &h;
    eventually("mirrored subtree removed", || async move {
        !h_ref.path("/app").exists()
    })
    .await;
    assert!(!h.is_dynamic("/app/nested/tpl"));
    assert_eq!(h.read("/apple").as_deref(), Some("kept"));
    assert!(h.store.mirror_index().get("/app/plain").is_none());

    // the released template no longer reacts to its key
    h.kv.set("/db/host", "db2").await.unwrap();
    eventually("dependency change mirrored", || async move {
        h_ref.read("/db/host").as_deref() == Some("db2")
    })
    .await;
    assert!(!h.path("/app/nested/tpl").exists());

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_leaf_delete_removes_exactly_that_file() {
    let h = Harness::new();
    h.kv.set("/app/one", "1").await.unwrap();
    h.kv.set("/app/two", "2").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();

    h.kv.delete("/app/one").await.unwrap();

    let h_ref = &h;
    eventually("leaf removed", || async move { !h_ref.path("/app/one").exists() }).await;
    assert_eq!(h.read("/app/two").as_deref(), Some("2"));
    assert!(h.path("/app").is_dir());

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_template_change_recreates_registration() {
    let h = Harness::new();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/db/port", "5432").await.unwrap();
    h.kv.set("/app/config", r#"$TEMPLATE${{ getv "/db/host" }}"#)
        .await
        .unwrap();
    let handle = h.store.synchronize().await.unwrap();
    let first = h.store.dynamic_store().is_dynamic("/app/config").unwrap();

    h.kv.set("/app/config", r#"$TEMPLATE${{ getv "/db/port" }}"#)
        .await
        .unwrap();

    let h_ref = &h;
    eventually("new template rendered", || async move {
        h_ref.read("/app/config").as_deref() == Some("5432")
    })
    .await;
    let second = h.store.dynamic_store().is_dynamic("/app/config").unwrap();
    assert!(!std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(h.store.dynamic_store().paths(), vec!["/app/config".to_string()]);
    // root watch plus the watch on /db/port
    assert_eq!(h.kv.watch_count(), 2);

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_rapid_delete_and_create_apply_in_order() {
    let h = Harness::new();
    h.kv.set("/app/config", "v1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();

    for round in 0..10 {
        h.kv.delete("/app/config").await.unwrap();
        h.kv.set("/app/config", &format!("v{}", round + 2)).await.unwrap();
    }

    let h_ref = &h;
    eventually("last write wins", || async move {
        h_ref.read("/app/config").as_deref() == Some("v11")
    })
    .await;

    h.store.close();
    handle.wait().await.unwrap();
    assert_eq!(h.read("/app/config").as_deref(), Some("v11"));
    assert_eq!(h.store.stats().handler_failures, 0);
}

#[tokio::test]
async fn test_failed_event_does_not_stop_the_loop() {
    let h = Harness::new();
    h.kv.set("/app/config", "v1").await.unwrap();
    let handle = h.store.synchronize().await.unwrap();

    // the mirrored file disappears behind the engine's back, so the delete event fails
    std::fs::remove_file(h.path("/app/config")).unwrap();
    h.kv.delete("/app/config").await.unwrap();
    h.kv.set("/app/after", "still running").await.unwrap();

    let h_ref = &h;
    eventually("later events still applied", || async move {
        h_ref.read("/app/after").as_deref() == Some("still running")
    })
    .await;
    assert_eq!(h.store.stats().handler_failures, 1);

    h.store.close();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_template_replaced_by_plain_value_matches_a_fresh_build() {
    let h = Harness::new();
    h.kv.set("/db/host", "db1").await.unwrap();
    h.kv.set("/app/config", r#"$TEMPLATE${{ getv "/db/host" }}"#)
        .await
        .unwrap();
    let handle = h.store.synchronize().await.unwrap();
    assert!(h.is_dynamic("/app/config"));

    h.kv.set("/app/config", "greeting={{ name }}").await.unwrap();

    let h_ref = &h;
    eventually("raw value mirrored", || async move {
        h_ref.read("/app/config").as_deref() == Some("greeting={{ name }}")
    })
    .await;
    assert!(!h.is_dynamic("/app/config"));
    assert_eq!(h.store.stats().handler_failures, 0);

    // the old dependency no longer drives the file
    h.kv.set("/db/host", "db2").await.unwrap();
    eventually("dependency change mirrored", || async move {
        h_ref.read("/db/host").as_deref() == Some("db2")
    })
    .await;
    assert_eq!(h.read("/app/config").as_deref(), Some("greeting={{ name }}"));

    h.store.close();
    handle.wait().await.unwrap();
}
