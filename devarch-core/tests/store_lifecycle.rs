mod common;

use std::collections::BTreeMap;

use devarch_core::error::ErrorKind;
use devarch_core::types::{EnvVar, PortSpec, Protocol};
use devarch_core::validation::MAX_NAME_LEN;

use common::{open_store, php_template, test_settings};

#[tokio::test]
async fn stack_names_unique_among_active_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;

    store.create_stack("a", "", None).await.unwrap();
    let err = store.create_stack("a", "", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    // Trash frees the name; restore then conflicts with the new holder.
    store.soft_delete_stack("a").await.unwrap();
    store.create_stack("a", "second", None).await.unwrap();
    let err = store.restore_stack("a").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn stack_name_length_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;

    let at_limit = "a".repeat(MAX_NAME_LEN);
    store.create_stack(&at_limit, "", None).await.unwrap();

    let over = "a".repeat(MAX_NAME_LEN + 1);
    let err = store.create_stack(&over, "", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.suggestion.is_some());
}

#[tokio::test]
async fn instance_ids_unique_within_stack() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    store.seed_template("php", php_template()).await.unwrap();
    store.create_stack("a", "", None).await.unwrap();
    store.create_stack("b", "", None).await.unwrap();

    store.add_instance("a", "web", "php").await.unwrap();
    let err = store.add_instance("a", "web", "php").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    // Same id in another stack is fine.
    store.add_instance("b", "web", "php").await.unwrap();
}

#[tokio::test]
async fn missing_template_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    store.create_stack("a", "", None).await.unwrap();

    let err = store.add_instance("a", "web", "ghost").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn override_sets_replace_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    store.seed_template("php", php_template()).await.unwrap();
    store.create_stack("a", "", None).await.unwrap();
    let instance = store.add_instance("a", "web", "php").await.unwrap();

    store
        .replace_ports(
            &instance.id,
            &[PortSpec {
                host: Some(8080),
                container: 80,
                protocol: Protocol::Tcp,
            }],
        )
        .await
        .unwrap();
    store
        .replace_env(
            &instance.id,
            &[EnvVar {
                key: "APP_ENV".to_string(),
                value: "production".to_string(),
                secret: false,
            }],
        )
        .await
        .unwrap();

    let overrides = store.get_overrides(&instance.id).await.unwrap();
    assert_eq!(overrides.ports.as_ref().unwrap().len(), 1);
    assert_eq!(overrides.env.len(), 1);

    // Empty replacement clears the set back to inherit.
    store.replace_ports(&instance.id, &[]).await.unwrap();
    let overrides = store.get_overrides(&instance.id).await.unwrap();
    assert!(overrides.ports.is_none());
}

#[tokio::test]
async fn scalar_overrides_round_trip_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    store.seed_template("php", php_template()).await.unwrap();
    store.create_stack("a", "", None).await.unwrap();
    let instance = store.add_instance("a", "web", "php").await.unwrap();

    let scalars = devarch_core::types::ScalarOverrides {
        image: Some("php:8.4-fpm".to_string()),
        command: Some(vec!["php-fpm".to_string(), "-F".to_string()]),
        ..Default::default()
    };
    store.replace_scalars(&instance.id, &scalars).await.unwrap();

    let overrides = store.get_overrides(&instance.id).await.unwrap();
    assert_eq!(overrides.scalars, scalars);

    // An all-empty replacement clears the row back to inherit.
    store
        .replace_scalars(&instance.id, &Default::default())
        .await
        .unwrap();
    let overrides = store.get_overrides(&instance.id).await.unwrap();
    assert!(overrides.scalars.is_empty());
}

#[tokio::test]
async fn clone_copies_instances_and_overrides_but_not_lockfile() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    store.seed_template("php", php_template()).await.unwrap();
    let source = store.create_stack("a", "original", None).await.unwrap();
    let instance = store.add_instance("a", "web", "php").await.unwrap();
    store
        .replace_env(
            &instance.id,
            &[EnvVar {
                key: "CLONED".to_string(),
                value: "yes".to_string(),
                secret: false,
            }],
        )
        .await
        .unwrap();
    store
        .replace_lockfile(
            &source.id,
            &[devarch_core::types::LockfileEntry {
                stack_id: source.id.clone(),
                instance_id: "web".to_string(),
                host_ports: vec![9000],
                image_digest: Some("sha256:x".to_string()),
                template_version: 1,
                config_hash: "h".to_string(),
                config_snapshot: "{}".to_string(),
                recorded_at: chrono::Utc::now(),
            }],
        )
        .await
        .unwrap();

    let cloned = store.clone_stack("a", "a2").await.unwrap();
    assert_eq!(cloned.network(), "devarch-a2-net");
    assert!(cloned.last_applied_checksum.is_none());

    let instances = store.list_instances(&cloned.id).await.unwrap();
    assert_eq!(instances.len(), 1);
    let overrides = store.get_overrides(&instances[0].id).await.unwrap();
    assert_eq!(overrides.env.len(), 1);
    assert_eq!(overrides.env[0].key, "CLONED");

    assert!(store.get_lockfile(&cloned.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn advisory_lock_blocks_second_holder() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    let stack = store.create_stack("a", "", None).await.unwrap();

    store.acquire_lock(&stack.id, "one", 60).await.unwrap();
    let err = store.acquire_lock(&stack.id, "two", 60).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackBusy);

    // Releasing with the wrong holder is a no-op; the right one frees it.
    store.release_lock(&stack.id, "two").await.unwrap();
    assert!(store.get_lock(&stack.id).await.unwrap().is_some());
    store.release_lock(&stack.id, "one").await.unwrap();
    assert!(store.get_lock(&stack.id).await.unwrap().is_none());
}

#[tokio::test]
async fn expired_locks_break_only_via_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    let stack = store.create_stack("a", "", None).await.unwrap();

    store.acquire_lock(&stack.id, "stale", 0).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    // Still held from a normal caller's point of view.
    let err = store.acquire_lock(&stack.id, "two", 60).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackBusy);

    let broken = store.break_expired_locks().await.unwrap();
    assert_eq!(broken, vec![stack.id.clone()]);
    store.acquire_lock(&stack.id, "two", 60).await.unwrap();
}

#[tokio::test]
async fn hard_delete_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;
    store.seed_template("php", php_template()).await.unwrap();
    let stack = store.create_stack("a", "", None).await.unwrap();
    let instance = store.add_instance("a", "web", "php").await.unwrap();
    store
        .replace_labels(
            &instance.id,
            &BTreeMap::from([("com.example.x".to_string(), "1".to_string())]),
        )
        .await
        .unwrap();

    // Active stacks refuse to be purged.
    let err = store.hard_delete_stack(&stack.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    store.soft_delete_stack("a").await.unwrap();
    store.hard_delete_stack(&stack.id).await.unwrap();
    assert!(store.get_stack_by_id(&stack.id).await.unwrap().is_none());
}

#[tokio::test]
async fn template_version_bumps_on_content_change() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&test_settings(dir.path())).await;

    let v1 = store.seed_template("php", php_template()).await.unwrap();
    assert_eq!(v1.version, 1);

    // Re-seeding identical content keeps the version.
    let same = store.seed_template("php", php_template()).await.unwrap();
    assert_eq!(same.version, 1);

    let mut changed = php_template();
    changed.image = "php:8.4-fpm".to_string();
    let v2 = store.seed_template("php", changed).await.unwrap();
    assert_eq!(v2.version, 2);
}
