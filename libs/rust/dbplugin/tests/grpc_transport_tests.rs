//! gRPC clients against in-process plugin servers.
//!
//! The servers are hand-assembled `tonic` services over the prost messages in
//! `dbplugin::proto`, backed by a shared record of what the plugin was asked.

use chrono::{DateTime, TimeZone, Utc};
use dbplugin::convert::{from_timestamp, json_bytes_to_map, map_to_json_bytes, map_to_struct, struct_to_map};
use dbplugin::grpc::{GrpcDatabaseV4, GrpcDatabaseV5};
use dbplugin::proto::{v4 as pb4, v5 as pb5};
use dbplugin::{
    ChangeExpiration, ChangePassword, CredentialType, DatabaseV4, DatabaseV5, DeleteUserRequest, InitializeRequest,
    NewUserRequest, PluginError, Statements, StatementsV4, StaticUserConfig, UpdateUserRequest, UsernameMetadata,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Service, StdError};
use tonic::server::{NamedService, UnaryService};
use tonic::transport::server::Router;
use tonic::transport::{Channel, Endpoint, Server};
use tonic::Status;

/// What the plugin was asked to do.
#[derive(Debug, Default)]
struct Recorded {
    users: HashMap<String, String>,
    expirations: HashMap<String, DateTime<Utc>>,
    statements: Vec<String>,
}

type Shared = Arc<Mutex<Recorded>>;

/// A unary method answered by a closure.
struct Method<F>(F);

impl<Req, Resp, F> UnaryService<Req> for Method<F>
where
    F: FnMut(Req) -> Result<Resp, Status>,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Future = BoxFuture<tonic::Response<Resp>, Status>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let result = (self.0)(request.into_inner()).map(tonic::Response::new);
        Box::pin(std::future::ready(result))
    }
}

async fn unary<Req, Resp, B>(
    req: http::Request<B>,
    handler: impl FnMut(Req) -> Result<Resp, Status> + Send + 'static,
) -> http::Response<BoxBody>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    let codec: ProstCodec<Resp, Req> = ProstCodec::default();
    tonic::server::Grpc::new(codec).unary(Method(handler), req).await
}

fn unimplemented_method() -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(Status::GRPC_STATUS, (tonic::Code::Unimplemented as i32).into());
    headers.insert(http::header::CONTENT_TYPE, tonic::metadata::GRPC_CONTENT_TYPE);
    response
}

fn invalid(e: &PluginError) -> Status {
    Status::invalid_argument(e.to_string())
}

fn missing_user(username: &str) -> Status {
    Status::not_found(format!("user {username:?} does not exist"))
}

#[derive(Debug, Clone)]
struct PluginV5 {
    state: Shared,
}

impl NamedService for PluginV5 {
    const NAME: &'static str = pb5::SERVICE;
}

impl<B> Service<http::Request<B>> for PluginV5
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let state = self.state.clone();
        let path = req.uri().path().to_string();
        Box::pin(async move {
            let response = match path.as_str() {
                pb5::INITIALIZE => {
                    unary(req, |r: pb5::InitializeRequest| {
                        let mut config = r.config_data.as_ref().map(struct_to_map).unwrap_or_default();
                        config.insert("verified".into(), json!(r.verify_connection));
                        Ok(pb5::InitializeResponse {
                            config_data: Some(map_to_struct(&config)),
                        })
                    })
                    .await
                }
                pb5::NEW_USER => {
                    unary(req, move |r: pb5::NewUserRequest| {
                        let req = NewUserRequest::try_from(r).map_err(|e| invalid(&e))?;
                        let username =
                            format!("v-{}-{}", req.username_config.display_name, req.username_config.role_name);
                        let mut state = state.lock();
                        state.statements.extend(req.statements.commands);
                        state.expirations.insert(username.clone(), req.expiration);
                        state.users.insert(username.clone(), req.password);
                        Ok(pb5::NewUserResponse { username })
                    })
                    .await
                }
                pb5::UPDATE_USER => {
                    unary(req, move |r: pb5::UpdateUserRequest| {
                        let req = UpdateUserRequest::try_from(r).map_err(|e| invalid(&e))?;
                        let mut state = state.lock();
                        if !state.users.contains_key(&req.username) {
                            return Err(missing_user(&req.username));
                        }
                        if let Some(change) = req.password {
                            state.statements.extend(change.statements.commands);
                            state.users.insert(req.username.clone(), change.new_password);
                        }
                        if let Some(change) = req.expiration {
                            state.expirations.insert(req.username, change.new_expiration);
                        }
                        Ok(pb5::UpdateUserResponse {})
                    })
                    .await
                }
                pb5::DELETE_USER => {
                    unary(req, move |r: pb5::DeleteUserRequest| {
                        let mut state = state.lock();
                        state.users.remove(&r.username);
                        state.statements.extend(r.statements.map(|s| s.commands).unwrap_or_default());
                        Ok(pb5::DeleteUserResponse {})
                    })
                    .await
                }
                pb5::TYPE => {
                    unary(req, |_: pb5::Empty| {
                        Ok(pb5::TypeResponse {
                            r#type: "in-process".into(),
                        })
                    })
                    .await
                }
                pb5::CLOSE => unary(req, |_: pb5::Empty| Ok(pb5::Empty {})).await,
                _ => unimplemented_method(),
            };
            Ok::<_, Infallible>(response)
        })
    }
}

#[derive(Debug, Clone)]
struct PluginV4 {
    state: Shared,
}

impl NamedService for PluginV4 {
    const NAME: &'static str = pb4::SERVICE;
}

impl<B> Service<http::Request<B>> for PluginV4
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let state = self.state.clone();
        let path = req.uri().path().to_string();
        Box::pin(async move {
            let response = match path.as_str() {
                pb4::INIT => {
                    unary(req, |r: pb4::InitRequest| {
                        let mut config = json_bytes_to_map(&r.config).map_err(|e| invalid(&e))?;
                        config.insert("verified".into(), json!(r.verify_connection));
                        let config = map_to_json_bytes(&config).map_err(|e| invalid(&e))?;
                        Ok(pb4::InitResponse { config })
                    })
                    .await
                }
                pb4::CREATE_USER => {
                    unary(req, move |r: pb4::CreateUserRequest| {
                        let expiration = from_timestamp(r.expiration.as_ref()).map_err(|e| invalid(&e))?;
                        let names = r.username_config.unwrap_or_default();
                        let username = format!("v4-{}-{}", names.display_name, names.role_name);
                        let password = "plugin-chosen-password".to_string();
                        let mut state = state.lock();
                        state.statements.extend(r.statements.map(|s| s.creation).unwrap_or_default());
                        state.expirations.insert(username.clone(), expiration);
                        state.users.insert(username.clone(), password.clone());
                        Ok(pb4::CreateUserResponse { username, password })
                    })
                    .await
                }
                pb4::RENEW_USER => {
                    unary(req, move |r: pb4::RenewUserRequest| {
                        let expiration = from_timestamp(r.expiration.as_ref()).map_err(|e| invalid(&e))?;
                        let mut state = state.lock();
                        if !state.users.contains_key(&r.username) {
                            return Err(missing_user(&r.username));
                        }
                        state.expirations.insert(r.username, expiration);
                        Ok(pb4::Empty {})
                    })
                    .await
                }
                pb4::REVOKE_USER => {
                    unary(req, move |r: pb4::RevokeUserRequest| {
                        let mut state = state.lock();
                        state.users.remove(&r.username);
                        state.statements.extend(r.statements.map(|s| s.revocation).unwrap_or_default());
                        Ok(pb4::Empty {})
                    })
                    .await
                }
                pb4::ROTATE_ROOT_CREDENTIALS => {
                    unary(req, |r: pb4::RotateRootCredentialsRequest| {
                        let mut config = Map::new();
                        config.insert("password".into(), json!("rotated-root"));
                        config.insert("statements".into(), json!(r.statements));
                        let config = map_to_json_bytes(&config).map_err(|e| invalid(&e))?;
                        Ok(pb4::RotateRootCredentialsResponse { config })
                    })
                    .await
                }
                pb4::GENERATE_CREDENTIALS => {
                    unary(req, |_: pb4::Empty| {
                        Ok(pb4::GenerateCredentialsResponse {
                            password: "generated-by-plugin".into(),
                        })
                    })
                    .await
                }
                pb4::TYPE => {
                    unary(req, |_: pb4::Empty| {
                        Ok(pb4::TypeResponse {
                            r#type: "in-process-legacy".into(),
                        })
                    })
                    .await
                }
                pb4::CLOSE => unary(req, |_: pb4::Empty| Ok(pb4::Empty {})).await,
                // SetCredentials is left out, like older v4 plugins.
                _ => unimplemented_method(),
            };
            Ok::<_, Infallible>(response)
        })
    }
}

async fn connect(router: Router) -> Channel {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(router.serve_with_incoming(TcpListenerStream::new(listener)));
    Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap()
}

fn expiry() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_003_600, 0).unwrap()
}

fn details() -> Map<String, Value> {
    json!({
        "connection_url": "postgres://{{username}}:{{password}}@db:5432/app",
        "username": "vaultadmin",
        "max_open_connections": 4,
        "tls": {"enabled": true, "ciphers": ["a", "b"]},
    })
    .as_object()
    .cloned()
    .unwrap()
}

#[tokio::test]
async fn test_v5_client_round_trip() {
    let state = Shared::default();
    let channel = connect(Server::builder().add_service(PluginV5 { state: state.clone() })).await;
    let plugin = GrpcDatabaseV5::new(channel, None);

    assert_eq!(plugin.type_name().await.unwrap(), "in-process");

    let init = plugin
        .initialize(InitializeRequest {
            config: details(),
            verify_connection: true,
        })
        .await
        .unwrap();
    let mut expected = details();
    expected.insert("verified".into(), json!(true));
    assert_eq!(init.config, expected);

    let created = plugin
        .new_user(NewUserRequest {
            username_config: UsernameMetadata {
                display_name: "token".into(),
                role_name: "app".into(),
            },
            statements: Statements::new(vec!["CREATE ROLE \"{{name}}\"".into()]),
            rollback_statements: Statements::default(),
            credential_type: CredentialType::Password,
            password: "caller-chosen-Pa55".into(),
            public_key: Vec::new(),
            expiration: expiry(),
        })
        .await
        .unwrap();
    assert_eq!(created.username, "v-token-app");
    {
        let recorded = state.lock();
        assert_eq!(recorded.users["v-token-app"], "caller-chosen-Pa55");
        assert_eq!(recorded.expirations["v-token-app"], expiry());
        assert_eq!(recorded.statements, vec!["CREATE ROLE \"{{name}}\""]);
    }

    plugin
        .update_user(UpdateUserRequest {
            username: "v-token-app".into(),
            password: Some(ChangePassword {
                new_password: "rotated-Pa55".into(),
                statements: Statements::new(vec!["ALTER ROLE".into()]),
            }),
            ..UpdateUserRequest::default()
        })
        .await
        .unwrap();
    let later = expiry() + chrono::Duration::hours(1);
    plugin
        .update_user(UpdateUserRequest {
            username: "v-token-app".into(),
            expiration: Some(ChangeExpiration {
                new_expiration: later,
                statements: Statements::default(),
            }),
            ..UpdateUserRequest::default()
        })
        .await
        .unwrap();
    {
        let recorded = state.lock();
        assert_eq!(recorded.users["v-token-app"], "rotated-Pa55");
        assert_eq!(recorded.expirations["v-token-app"], later);
    }

    plugin
        .delete_user(DeleteUserRequest {
            username: "v-token-app".into(),
            statements: Statements::new(vec!["DROP ROLE".into()]),
        })
        .await
        .unwrap();
    assert!(state.lock().users.is_empty());

    plugin.close().await.unwrap();
    plugin.close().await.unwrap();
}

#[tokio::test]
async fn test_v5_client_maps_error_status() {
    let state = Shared::default();
    let channel = connect(Server::builder().add_service(PluginV5 { state })).await;
    let plugin = GrpcDatabaseV5::new(channel, None);

    let err = plugin
        .update_user(UpdateUserRequest {
            username: "ghost".into(),
            password: Some(ChangePassword {
                new_password: "x".into(),
                statements: Statements::default(),
            }),
            ..UpdateUserRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Database(ref msg) if msg.contains("ghost")), "{err}");
}

#[tokio::test]
async fn test_v4_client_round_trip() {
    let state = Shared::default();
    let channel = connect(Server::builder().add_service(PluginV4 { state: state.clone() })).await;
    let plugin = GrpcDatabaseV4::new(channel, None);

    assert_eq!(plugin.type_name().await.unwrap(), "in-process-legacy");

    let config = plugin.init(details(), false).await.unwrap();
    assert_eq!(config["verified"], json!(false));
    assert_eq!(config["max_open_connections"], json!(4));
    assert_eq!(config["tls"]["ciphers"], json!(["a", "b"]));

    let statements = StatementsV4 {
        creation: vec!["CREATE USER".into()],
        revocation: vec!["DROP USER".into()],
        ..StatementsV4::default()
    };
    let (username, password) = plugin
        .create_user(
            statements.clone(),
            UsernameMetadata {
                display_name: "token".into(),
                role_name: "app".into(),
            },
            expiry(),
        )
        .await
        .unwrap();
    assert_eq!(username, "v4-token-app");
    assert_eq!(password, "plugin-chosen-password");
    assert_eq!(state.lock().expirations[&username], expiry());

    let later = expiry() + chrono::Duration::hours(2);
    plugin.renew_user(statements.clone(), &username, later).await.unwrap();
    assert_eq!(state.lock().expirations[&username], later);

    let rotated = plugin.rotate_root_credentials(vec!["ALTER USER".into()]).await.unwrap();
    assert_eq!(rotated["password"], json!("rotated-root"));
    assert_eq!(rotated["statements"], json!(["ALTER USER"]));
    assert_eq!(plugin.generate_credentials().await.unwrap(), "generated-by-plugin");

    plugin.revoke_user(statements, &username).await.unwrap();
    let recorded = state.lock();
    assert!(recorded.users.is_empty());
    assert_eq!(recorded.statements, vec!["CREATE USER", "DROP USER"]);
}

#[tokio::test]
async fn test_v4_client_maps_error_status() {
    let state = Shared::default();
    let channel = connect(Server::builder().add_service(PluginV4 { state })).await;
    let plugin = GrpcDatabaseV4::new(channel, None);

    let err = plugin
        .set_credentials(
            StatementsV4::default(),
            StaticUserConfig {
                username: "app".into(),
                password: "pw".into(),
                create: false,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_unimplemented(), "{err}");

    let err = plugin
        .renew_user(StatementsV4::default(), "ghost", expiry())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Database(_)), "{err}");
}
