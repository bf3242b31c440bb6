//! Request surface: maps `(path, operation)` to handlers.

mod config;
mod creds;
mod reset;
mod roles;
mod rotate;
mod static_roles;

use crate::backend::DatabaseBackend;
use crate::error::{BackendError, BackendResult};
use serde_json::{Map, Value};
use vault_sdk::framework::{FieldData, PathPattern};
use vault_sdk::{Operation, Request, Response, SdkError};

/// Handler families reachable through the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    ConfigList,
    Config,
    Reset,
    Reload,
    RotateRoot,
    RotateRole,
    RoleList,
    Role,
    Creds,
    StaticRoleList,
    StaticRole,
    StaticCreds,
    Ca,
    CaRotate,
}

/// Ordered path table. The first matching pattern wins.
#[derive(Debug)]
pub(crate) struct Router {
    routes: Vec<(PathPattern, Endpoint)>,
}

impl Router {
    pub(crate) fn new() -> BackendResult<Self> {
        let table: [(&str, Option<&'static str>, Endpoint); 14] = [
            ("config/", None, Endpoint::ConfigList),
            ("config/", Some("name"), Endpoint::Config),
            ("reset/", Some("name"), Endpoint::Reset),
            ("reload/", Some("plugin_name"), Endpoint::Reload),
            ("rotate-root/", Some("name"), Endpoint::RotateRoot),
            ("rotate-role/", Some("name"), Endpoint::RotateRole),
            ("roles/", None, Endpoint::RoleList),
            ("roles/", Some("name"), Endpoint::Role),
            ("creds/", Some("name"), Endpoint::Creds),
            ("static-roles/", None, Endpoint::StaticRoleList),
            ("static-roles/", Some("name"), Endpoint::StaticRole),
            ("static-creds/", Some("name"), Endpoint::StaticCreds),
            ("ca", None, Endpoint::Ca),
            ("ca/rotate", None, Endpoint::CaRotate),
        ];
        let routes = table
            .into_iter()
            .map(|(prefix, capture, endpoint)| Ok((PathPattern::new(prefix, capture)?, endpoint)))
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(Self { routes })
    }

    /// Endpoint and captured segments for `path`.
    pub(crate) fn route(&self, path: &str) -> Option<(Endpoint, Map<String, Value>)> {
        self.routes
            .iter()
            .find_map(|(pattern, endpoint)| pattern.matches(path).map(|captures| (*endpoint, captures)))
    }
}

/// Captured `key` from the path.
pub(crate) fn captured<'a>(captures: &'a Map<String, Value>, key: &str) -> BackendResult<&'a str> {
    captures
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BackendError::invalid_request(format!("empty {key}")))
}

/// Request body validated against `schema`.
pub(crate) fn field_data(req: &Request, schema: &[vault_sdk::framework::FieldSchema], check_required: bool) -> BackendResult<FieldData> {
    let data = FieldData::new(req.data.clone(), schema);
    data.validate(check_required)?;
    Ok(data)
}

impl DatabaseBackend {
    pub(crate) async fn dispatch(
        &self,
        endpoint: Endpoint,
        req: &Request,
        captures: &Map<String, Value>,
    ) -> BackendResult<Option<Response>> {
        use Endpoint as E;
        use Operation as Op;

        match (endpoint, req.operation) {
            (E::ConfigList, Op::List) => self.config_list().await,
            (E::Config, Op::Create | Op::Update) => self.config_write(req, captured(captures, "name")?).await,
            (E::Config, Op::Read) => self.config_read(req, captured(captures, "name")?).await,
            (E::Config, Op::Delete) => self.config_delete(req, captured(captures, "name")?).await,
            (E::Reset, Op::Update) => self.reset_connection(req, captured(captures, "name")?).await,
            (E::Reload, Op::Update) => self.reload_plugin(req, captured(captures, "plugin_name")?).await,
            (E::RotateRoot, Op::Update) => self.rotate_root(req, captured(captures, "name")?).await,
            (E::RotateRole, Op::Update) => self.rotate_role(req, captured(captures, "name")?).await,
            (E::RoleList, Op::List) => self.role_list().await,
            (E::Role, Op::Create | Op::Update) => self.role_write(req, captured(captures, "name")?).await,
            (E::Role, Op::Read) => self.role_read(req, captured(captures, "name")?).await,
            (E::Role, Op::Delete) => self.role_delete(req, captured(captures, "name")?).await,
            (E::Creds, Op::Read) => self.creds_read(req, captured(captures, "name")?).await,
            (E::StaticRoleList, Op::List) => self.static_role_list().await,
            (E::StaticRole, Op::Create | Op::Update) => {
                self.static_role_write(req, captured(captures, "name")?).await
            }
            (E::StaticRole, Op::Read) => self.static_role_read(req, captured(captures, "name")?).await,
            (E::StaticRole, Op::Delete) => self.static_role_delete(req, captured(captures, "name")?).await,
            (E::StaticCreds, Op::Read) => self.static_creds_read(req, captured(captures, "name")?).await,
            (E::Ca, Op::Read) => self.ca_read().await,
            (E::CaRotate, Op::Update) => self.ca_rotate().await,
            _ => Err(SdkError::UnsupportedOperation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_resolve() {
        let router = Router::new().unwrap();
        assert_eq!(router.route("config/").map(|r| r.0), Some(Endpoint::ConfigList));
        let (endpoint, captures) = router.route("config/pg-main").unwrap();
        assert_eq!(endpoint, Endpoint::Config);
        assert_eq!(captures["name"], "pg-main");
        assert_eq!(router.route("reload/postgresql-database-plugin").map(|r| r.0), Some(Endpoint::Reload));
        assert_eq!(router.route("static-creds/app").map(|r| r.0), Some(Endpoint::StaticCreds));
        assert_eq!(router.route("ca").map(|r| r.0), Some(Endpoint::Ca));
        assert_eq!(router.route("ca/rotate").map(|r| r.0), Some(Endpoint::CaRotate));
    }

    #[test]
    fn test_unknown_paths_do_not_route() {
        let router = Router::new().unwrap();
        assert!(router.route("unknown/x").is_none());
        assert!(router.route("creds/").is_none());
        assert!(router.route("config/a/b").is_none());
    }
}
