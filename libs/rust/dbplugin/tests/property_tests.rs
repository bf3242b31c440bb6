//! Property-based tests for dbplugin.

use dbplugin::convert::{map_to_struct, struct_to_map};
use dbplugin::runner::Handshake;
use dbplugin::{ErrorSanitizer, PluginError};
use proptest::prelude::*;
use serde_json::{Map, Value};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_sanitized_errors_never_contain_secrets(
        prefix in "[a-z :]{0,20}",
        secret in "[A-Za-z0-9]{8,24}",
        suffix in "[a-z :]{0,20}",
    ) {
        let sanitizer = ErrorSanitizer::with_secrets([secret.clone()]);
        let err = sanitizer.sanitize(PluginError::database(format!("{prefix}{secret}{suffix}{secret}")));
        prop_assert!(!err.to_string().contains(&secret));
    }

    #[test]
    fn prop_string_maps_survive_struct_conversion(
        entries in prop::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,30}", 0..8),
    ) {
        let map: Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        prop_assert_eq!(struct_to_map(&map_to_struct(&map)), map);
    }

    #[test]
    fn prop_handshake_parses_advertised_port(port in 1u16.., app in 4u32..6) {
        let h = Handshake::parse(&format!("1|{app}|tcp|127.0.0.1:{port}|grpc")).unwrap();
        prop_assert_eq!(h.app_version, app);
        prop_assert_eq!(h.addr, format!("127.0.0.1:{port}"));
    }
}
