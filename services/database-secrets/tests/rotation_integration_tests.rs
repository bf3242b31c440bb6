//! Static-role rotation over a manually advanced clock.

mod common;

use chrono::{TimeZone, Utc};
use common::Harness;
use database_secrets::events;
use database_secrets::rotation::{StaticWal, STATIC_WAL_KIND};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use test_utils::fixtures::{
    connection_config, dynamic_role, scheduled_static_role, static_role, LEGACY_PLUGIN, POSTGRES_PLUGIN,
};
use test_utils::V4Options;
use vault_sdk::wal::{get_wal, list_wal, put_wal};
use vault_sdk::Operation;

fn harness_with_connection() -> Harness {
    let h = Harness::new();
    h.host.register_builtin_v5(POSTGRES_PLUGIN, "v1.0.0+builtin", &h.db);
    h
}

async fn configure(h: &Harness) {
    h.write("config/pg", connection_config(POSTGRES_PLUGIN, &["*"])).await;
}

#[tokio::test]
async fn test_static_rotation_cadence() {
    let h = harness_with_connection();
    configure(&h).await;
    let periods = [("fast", 65), ("medium", 130), ("slow", 5400)];
    for (name, period) in periods {
        h.db.add_user(name, "initial-password");
        h.write(&format!("static-roles/{name}"), static_role("pg", name, period)).await;
    }

    let mut samples: Vec<Vec<String>> = vec![Vec::new(); periods.len()];
    for advance in [0, 82, 140] {
        h.clock.advance(Duration::from_secs(advance));
        h.backend.rotate_due_credentials().await;
        for (i, (name, _)) in periods.iter().enumerate() {
            samples[i].push(h.static_password(name).await);
        }
    }

    let fast: HashSet<_> = samples[0].iter().collect();
    assert_eq!(fast.len(), 3, "65s role should rotate at every sample");
    assert_eq!(samples[1][0], samples[1][1]);
    assert_ne!(samples[1][1], samples[1][2]);
    assert!(samples[2].iter().all(|pw| *pw == samples[2][0]));
    for (i, (name, _)) in periods.iter().enumerate() {
        assert!(h.db.authenticate(name, samples[i].last().unwrap()));
    }
    assert!(!samples[0].iter().any(|pw| pw == "initial-password"));
}

#[tokio::test]
async fn test_rotation_never_runs_early() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 60)).await;
    let created = h.now();
    let first = h.static_password("app").await;
    assert_eq!(h.backend.queued_rotation("app"), Some(created.timestamp() + 60));

    h.clock.advance(Duration::from_secs(59));
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.static_password("app").await, first);

    h.clock.advance(Duration::from_secs(1));
    h.backend.rotate_due_credentials().await;
    assert_ne!(h.static_password("app").await, first);
    let creds = h.read("static-creds/app").await.unwrap();
    assert_eq!(creds.get("ttl"), Some(&json!(60)));
    assert_eq!(
        creds.get("last_vault_rotation"),
        Some(&json!(h.now().to_rfc3339()))
    );
    assert_eq!(h.events.of_type(events::STATIC_ROTATE_SUCCESS).len(), 1);
}

#[tokio::test]
async fn test_rotation_waits_out_the_partial_second() {
    let h = harness_with_connection();
    h.clock.set(Utc.timestamp_opt(1_700_000_000, 700_000_000).unwrap());
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 65)).await;
    let first = h.static_password("app").await;

    // 500ms short of the period.
    h.clock.advance(Duration::from_millis(64_500));
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.static_password("app").await, first);

    h.clock.advance(Duration::from_secs(1));
    h.backend.rotate_due_credentials().await;
    assert_ne!(h.static_password("app").await, first);
}

#[tokio::test]
async fn test_stale_static_wal_is_discarded_on_boot() {
    let mut h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 10)).await;
    let created = h.now();

    h.clock.advance(Duration::from_secs(12));
    h.backend.rotate_due_credentials().await;
    let rotated = h.static_password("app").await;

    let wal = StaticWal {
        role_name: "app".into(),
        username: "app".into(),
        new_password: "junk".into(),
        new_private_key: String::new(),
        new_public_key: String::new(),
        last_vault_rotation_was: Some(created - chrono::Duration::hours(1)),
    };
    put_wal(h.storage.as_ref(), STATIC_WAL_KIND, &wal, h.now()).await.unwrap();

    h.restart().await;
    assert!(list_wal(h.storage.as_ref()).await.unwrap().is_empty());
    let after = h.static_password("app").await;
    assert_ne!(after, "junk");
    assert_eq!(after, rotated);
}

#[tokio::test]
async fn test_pending_static_wal_is_replayed_on_boot() {
    let mut h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 3600)).await;
    let created = h.now();

    let wal = StaticWal {
        role_name: "app".into(),
        username: "app".into(),
        new_password: "replayed-password-0001".into(),
        new_private_key: String::new(),
        new_public_key: String::new(),
        last_vault_rotation_was: Some(created),
    };
    put_wal(h.storage.as_ref(), STATIC_WAL_KIND, &wal, h.now()).await.unwrap();

    h.restart().await;
    assert_eq!(h.backend.queued_rotation("app"), Some(h.now().timestamp()));
    h.backend.rotate_due_credentials().await;

    assert_eq!(h.static_password("app").await, "replayed-password-0001");
    assert!(h.db.authenticate("app", "replayed-password-0001"));
    assert!(list_wal(h.storage.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wal_of_deleted_role_is_dropped_on_boot() {
    let mut h = harness_with_connection();
    configure(&h).await;
    let wal = StaticWal {
        role_name: "gone".into(),
        username: "gone".into(),
        new_password: "junk".into(),
        new_private_key: String::new(),
        new_public_key: String::new(),
        last_vault_rotation_was: None,
    };
    put_wal(h.storage.as_ref(), STATIC_WAL_KIND, &wal, h.now()).await.unwrap();

    h.restart().await;
    assert!(list_wal(h.storage.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_rotation_retries_with_the_same_password() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 60)).await;

    h.db.set_failure(Some("connection refused"));
    h.clock.advance(Duration::from_secs(60));
    h.backend.rotate_due_credentials().await;
    let retry_at = h.now().timestamp() + 10;
    assert_eq!(h.backend.queued_rotation("app"), Some(retry_at));
    assert_eq!(h.events.of_type(events::STATIC_ROTATE_FAIL).len(), 1);

    let ids = list_wal(h.storage.as_ref()).await.unwrap();
    assert_eq!(ids.len(), 1);
    let pending: StaticWal = get_wal(h.storage.as_ref(), &ids[0])
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();

    h.db.set_failure(None);
    h.clock.advance(Duration::from_secs(10));
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.static_password("app").await, pending.new_password);
    assert!(list_wal(h.storage.as_ref()).await.unwrap().is_empty());
    assert!(h
        .backend
        .metrics_text()
        .unwrap()
        .contains("database_static_rotations_total{outcome=\"retry\"} 1"));
}

#[tokio::test]
async fn test_manual_rotation_reschedules() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 3600)).await;
    let first = h.static_password("app").await;

    h.clock.advance(Duration::from_secs(100));
    h.write("rotate-role/app", Value::Null).await;
    assert_ne!(h.static_password("app").await, first);
    assert_eq!(h.backend.queued_rotation("app"), Some(h.now().timestamp() + 3600));

    h.write("roles/dynamic", dynamic_role("pg")).await;
    let resp = h
        .request(Operation::Update, "rotate-role/dynamic", Value::Null)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.error(), Some("cannot rotate credentials of non-static accounts"));
}

#[tokio::test]
async fn test_import_without_rotation_keeps_password() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "existing-password");
    let mut body = static_role("pg", "app", 3600);
    body["skip_import_rotation"] = json!(true);
    body["password"] = json!("existing-password");
    h.write("static-roles/app", body).await;

    assert_eq!(h.static_password("app").await, "existing-password");
    assert_eq!(h.db.update_user_calls(), 0);
    assert!(h.backend.queued_rotation("app").is_some());
}

#[tokio::test]
async fn test_static_role_username_is_immutable() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 3600)).await;

    let resp = h
        .request(Operation::Update, "static-roles/app", json!({"username": "other"}))
        .await
        .unwrap()
        .unwrap();
    assert!(resp.is_error());

    h.write("static-roles/app", json!({"rotation_period": 7200})).await;
    let read = h.read("static-roles/app").await.unwrap();
    assert_eq!(read.get("username"), Some(&json!("app")));
    assert_eq!(read.get("rotation_period"), Some(&json!(7200)));
    assert!(read.get("password").is_none());
}

#[tokio::test]
async fn test_role_names_are_unique_across_kinds() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 3600)).await;

    let resp = h
        .request(Operation::Update, "roles/app", dynamic_role("pg"))
        .await
        .unwrap()
        .unwrap();
    assert!(resp.is_error());
}

#[tokio::test]
async fn test_delete_removes_role_from_queue() {
    let h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 60)).await;
    let password = h.db.password("app").unwrap();

    h.request(Operation::Delete, "static-roles/app", Value::Null).await.unwrap();
    assert!(h.backend.queued_rotation("app").is_none());
    h.clock.advance(Duration::from_secs(120));
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.db.password("app").unwrap(), password);
    let delete = &h.events.of_type(events::STATIC_ROLE_DELETE)[0];
    assert_eq!(delete.get("connection_name"), None);
}

#[tokio::test]
async fn test_plugin_without_static_support_rejects_role() {
    let h = Harness::new();
    h.host.register_v4(
        LEGACY_PLUGIN,
        "",
        &h.db,
        V4Options {
            set_credentials: false,
            renew_user: true,
        },
    );
    h.write("config/legacy", connection_config(LEGACY_PLUGIN, &["*"])).await;
    h.db.add_user("app", "initial-password");

    let result = h
        .request(Operation::Update, "static-roles/app", static_role("legacy", "app", 3600))
        .await;
    assert!(result.is_err());
    assert!(h.read("static-roles/app").await.is_none());
    assert!(list_wal(h.storage.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduled_rotation_skips_missed_window() {
    let h = harness_with_connection();
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap());
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write(
        "static-roles/app",
        scheduled_static_role("pg", "app", "0 * * * *", Some(3600)),
    )
    .await;
    let first = h.static_password("app").await;
    let eleven = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
    assert_eq!(h.backend.queued_rotation("app"), Some(eleven.timestamp()));

    // More than the window past 11:00: skip to the next slot.
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap());
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.static_password("app").await, first);
    let thirteen = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
    assert_eq!(h.backend.queued_rotation("app"), Some(thirteen.timestamp()));

    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 13, 5, 0).unwrap());
    h.backend.rotate_due_credentials().await;
    assert_ne!(h.static_password("app").await, first);
}

#[tokio::test]
async fn test_static_creds_respect_allowed_roles() {
    let h = harness_with_connection();
    h.write("config/pg", connection_config(POSTGRES_PLUGIN, &["app"])).await;
    h.db.add_user("other", "initial-password");

    let resp = h
        .request(Operation::Update, "static-roles/other", static_role("pg", "other", 3600))
        .await
        .unwrap()
        .unwrap();
    assert!(resp.is_error());

    let resp = h
        .request(Operation::Read, "static-creds/missing", Value::Null)
        .await
        .unwrap()
        .unwrap();
    assert!(resp.is_error());
}

async fn legacy_role_without_static_support(h: &Harness) {
    h.host.register_v4(
        LEGACY_PLUGIN,
        "",
        &h.db,
        V4Options {
            set_credentials: false,
            renew_user: true,
        },
    );
    h.write("config/legacy", connection_config(LEGACY_PLUGIN, &["*"])).await;
    h.db.add_user("app", "initial-password");
    let mut body = static_role("legacy", "app", 60);
    body["skip_import_rotation"] = json!(true);
    h.write("static-roles/app", body).await;
}

#[tokio::test]
async fn test_permanent_failure_drops_role_from_queue() {
    let h = Harness::new();
    legacy_role_without_static_support(&h).await;
    assert!(h.backend.queued_rotation("app").is_some());

    h.clock.advance(Duration::from_secs(61));
    h.backend.rotate_due_credentials().await;

    assert_eq!(h.backend.queued_rotation("app"), None);
    assert_eq!(h.events.of_type(events::STATIC_ROTATE_FAIL).len(), 1);
    assert!(h.events.of_type(events::STATIC_ROTATE_SUCCESS).is_empty());
    assert!(h
        .backend
        .metrics_text()
        .unwrap()
        .contains("database_static_rotations_total{outcome=\"failure\"} 1"));
    assert!(h.db.authenticate("app", "initial-password"));
    assert!(h.read("static-roles/app").await.is_some());
}

#[tokio::test]
async fn test_rollback_tick_requeues_role_with_pending_wal() {
    let h = Harness::new();
    legacy_role_without_static_support(&h).await;
    h.clock.advance(Duration::from_secs(61));
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.backend.queued_rotation("app"), None);
    let pending = list_wal(h.storage.as_ref()).await.unwrap();
    assert_eq!(pending.len(), 1);

    h.backend.rollback().await.unwrap();
    assert_eq!(h.backend.queued_rotation("app"), Some(h.now().timestamp()));
    assert_eq!(list_wal(h.storage.as_ref()).await.unwrap(), pending);

    // Still unsupported: the retry reuses the WAL and drops the role again.
    h.backend.rotate_due_credentials().await;
    assert_eq!(h.backend.queued_rotation("app"), None);
    assert_eq!(list_wal(h.storage.as_ref()).await.unwrap(), pending);
    assert_eq!(h.events.of_type(events::STATIC_ROTATE_FAIL).len(), 2);
}

#[tokio::test]
async fn test_unusable_static_wal_is_replaced_not_orphaned() {
    let mut h = harness_with_connection();
    configure(&h).await;
    h.db.add_user("app", "initial-password");
    h.write("static-roles/app", static_role("pg", "app", 3600)).await;
    let created = h.now();

    let empty = StaticWal {
        role_name: "app".into(),
        username: "app".into(),
        new_password: String::new(),
        new_private_key: String::new(),
        new_public_key: String::new(),
        last_vault_rotation_was: Some(created),
    };
    put_wal(h.storage.as_ref(), STATIC_WAL_KIND, &empty, h.now()).await.unwrap();

    h.restart().await;
    assert_eq!(h.backend.queued_rotation("app"), Some(h.now().timestamp()));
    h.backend.rotate_due_credentials().await;

    let password = h.static_password("app").await;
    assert!(!password.is_empty());
    assert!(h.db.authenticate("app", &password));
    assert!(list_wal(h.storage.as_ref()).await.unwrap().is_empty());
}
