//! Shared proptest generators.

use proptest::prelude::*;

/// Role and connection names accepted by the engine paths.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,14}[a-z0-9]"
}

/// Rotation periods in seconds, at least the five second minimum.
pub fn rotation_period_strategy() -> impl Strategy<Value = u64> {
    5u64..=86_400
}

/// `allowed_roles` globs paired with a name they must match.
pub fn glob_and_match_strategy() -> impl Strategy<Value = (String, String)> {
    ("[a-z]{1,6}", "[a-z0-9]{0,6}", "[a-z0-9]{0,6}").prop_map(|(stem, mid, tail)| {
        (format!("{stem}*{tail}"), format!("{stem}{mid}{tail}"))
    })
}

/// Connection URLs with embedded credentials: `(url, username, password)`.
pub fn credentialed_url_strategy() -> impl Strategy<Value = (String, String, String)> {
    (
        prop_oneof![Just("postgres"), Just("mysql"), Just("sqlserver")],
        "[a-z][a-z0-9]{2,10}",
        "[A-Za-z0-9]{8,20}",
        "[a-z]{3,10}",
        1024u16..65535,
    )
        .prop_map(|(scheme, user, pass, host, port)| {
            (format!("{scheme}://{user}:{pass}@{host}:{port}/app"), user, pass)
        })
}
