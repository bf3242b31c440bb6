//! Property-based tests for vault-sdk.

use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use vault_sdk::framework::parse_duration_second;
use vault_sdk::wal::{delete_wal, get_wal, list_wal, put_wal};
use vault_sdk::{InmemStorage, StringTemplate};

fn fields(display: &str, role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DisplayName".to_string(), display.to_string()),
        ("RoleName".to_string(), role.to_string()),
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_truncate_never_exceeds_limit(
        display in "[a-zA-Z0-9-]{0,40}",
        limit in 1usize..30,
    ) {
        let tmpl = StringTemplate::new(&format!("{{{{.DisplayName | truncate {limit}}}}}")).unwrap();
        let out = tmpl.generate(&fields(&display, "r")).unwrap();
        prop_assert_eq!(out.chars().count(), display.chars().count().min(limit));
        prop_assert!(display.starts_with(&out));
    }

    #[test]
    fn prop_truncate_sha256_is_deterministic_and_bounded(
        role in "[a-z]{0,64}",
        limit in 9usize..40,
    ) {
        let tmpl = StringTemplate::new(&format!("{{{{.RoleName | truncate_sha256 {limit}}}}}")).unwrap();
        let a = tmpl.generate(&fields("d", &role)).unwrap();
        let b = tmpl.generate(&fields("d", &role)).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert!(a.chars().count() <= limit);
        if role.len() <= limit {
            prop_assert_eq!(a, role);
        }
    }

    #[test]
    fn prop_duration_seconds_round_trip(secs in 0u64..10_000_000) {
        prop_assert_eq!(parse_duration_second(&json!(secs)).unwrap(), Duration::from_secs(secs));
        prop_assert_eq!(parse_duration_second(&json!(format!("{secs}s"))).unwrap(), Duration::from_secs(secs));
    }

    #[test]
    fn prop_wal_entries_survive_storage(kind in "[a-zA-Z]{1,16}", payload in "[ -~]{0,64}", secs in 0i64..4_000_000_000) {
        let storage = InmemStorage::new();
        let now = chrono::DateTime::from_timestamp(secs, 0).unwrap();
        tokio_test::block_on(async {
            let id = put_wal(&storage, &kind, &payload, now).await.unwrap();
            prop_assert_eq!(list_wal(&storage).await.unwrap(), vec![id.clone()]);

            let entry = get_wal(&storage, &id).await.unwrap().unwrap();
            prop_assert_eq!(&entry.kind, &kind);
            prop_assert_eq!(entry.created_at, now);
            prop_assert_eq!(entry.decode::<String>().unwrap(), payload.clone());

            delete_wal(&storage, &id).await.unwrap();
            prop_assert!(get_wal(&storage, &id).await.unwrap().is_none());
            Ok(())
        })?;
    }
}
