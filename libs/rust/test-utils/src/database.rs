//! In-memory database plugins.
//!
//! [`MockDatabase`] plays the database server: it holds accounts and their
//! credentials and can be shared by several plugin instances, the same way
//! several connections reach one real server. [`MockDatabaseV5`] and
//! [`MockDatabaseV4`] implement the two plugin generations on top of it.
//! Every plugin call authenticates with the root credentials from the
//! plugin's connection details, so changing the root password out of band
//! breaks existing plugins just like it would against a real server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credential_random::StringGenerator;
use dbplugin::{
    CredentialType, DatabaseV4, DatabaseV5, DeleteUserRequest, DeleteUserResponse, InitializeRequest,
    InitializeResponse, NewUserRequest, NewUserResponse, PluginError, PluginResult, StatementsV4,
    StaticUserConfig, UpdateUserRequest, UpdateUserResponse, UsernameMetadata,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vault_sdk::StringTemplate;

/// Username template used when the connection does not set one.
pub const DEFAULT_USERNAME_TEMPLATE: &str =
    "v-{{.DisplayName | truncate 8}}-{{.RoleName | truncate 8}}-{{random 20}}-{{unix_time}}";

/// An account on the mock server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockUser {
    /// Current password
    pub password: String,
    /// Current PEM public key
    pub public_key: Vec<u8>,
    /// Account expiry
    pub expiration: Option<DateTime<Utc>>,
    /// Statements the account was created with
    pub statements: Vec<String>,
}

#[derive(Debug, Default)]
struct ServerState {
    users: HashMap<String, MockUser>,
    failure: Option<String>,
    new_user_calls: usize,
    update_user_calls: usize,
}

/// Shared in-memory database server.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<ServerState>>,
}

impl MockDatabase {
    /// Server with a single root account.
    #[must_use]
    pub fn new(root_username: &str, root_password: &str) -> Self {
        let db = Self::default();
        db.add_user(root_username, root_password);
        db
    }

    /// Create or overwrite an account.
    pub fn add_user(&self, username: &str, password: &str) {
        self.state.lock().users.insert(
            username.to_string(),
            MockUser {
                password: password.to_string(),
                ..MockUser::default()
            },
        );
    }

    /// Change a password out of band.
    pub fn set_password(&self, username: &str, password: &str) {
        if let Some(user) = self.state.lock().users.get_mut(username) {
            user.password = password.to_string();
        }
    }

    /// Current password of an account.
    #[must_use]
    pub fn password(&self, username: &str) -> Option<String> {
        self.state.lock().users.get(username).map(|u| u.password.clone())
    }

    /// Snapshot of an account.
    #[must_use]
    pub fn user(&self, username: &str) -> Option<MockUser> {
        self.state.lock().users.get(username).cloned()
    }

    /// Whether an account exists.
    #[must_use]
    pub fn has_user(&self, username: &str) -> bool {
        self.state.lock().users.contains_key(username)
    }

    /// Number of accounts, root included.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.state.lock().users.len()
    }

    /// Make every user mutation fail with `message` until cleared.
    pub fn set_failure(&self, message: Option<&str>) {
        self.state.lock().failure = message.map(str::to_string);
    }

    /// Number of `NewUser`/`CreateUser` calls that reached the server.
    #[must_use]
    pub fn new_user_calls(&self) -> usize {
        self.state.lock().new_user_calls
    }

    /// Number of password, key or expiration updates that reached the server.
    #[must_use]
    pub fn update_user_calls(&self) -> usize {
        self.state.lock().update_user_calls
    }

    /// Whether `password` is the current password of `username`.
    #[must_use]
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.state
            .lock()
            .users
            .get(username)
            .is_some_and(|u| u.password == password)
    }

    fn login(&self, root: &RootCredentials) -> PluginResult<()> {
        if self.authenticate(&root.username, &root.password) {
            Ok(())
        } else {
            Err(PluginError::database(format!(
                "password authentication failed for user \"{}\"",
                root.username
            )))
        }
    }

    fn check_failure(&self) -> PluginResult<()> {
        match &self.state.lock().failure {
            Some(msg) => Err(PluginError::database(msg.clone())),
            None => Ok(()),
        }
    }

    fn create(&self, username: &str, user: MockUser) -> PluginResult<()> {
        let mut state = self.state.lock();
        state.new_user_calls += 1;
        if state.users.contains_key(username) {
            return Err(PluginError::database(format!("role \"{username}\" already exists")));
        }
        state.users.insert(username.to_string(), user);
        Ok(())
    }

    fn update(&self, username: &str, f: impl FnOnce(&mut MockUser)) -> PluginResult<()> {
        let mut state = self.state.lock();
        state.update_user_calls += 1;
        let user = state
            .users
            .get_mut(username)
            .ok_or_else(|| PluginError::database(format!("role \"{username}\" does not exist")))?;
        f(user);
        Ok(())
    }

    fn remove(&self, username: &str) {
        self.state.lock().users.remove(username);
    }
}

#[derive(Debug, Clone, Default)]
struct RootCredentials {
    username: String,
    password: String,
}

/// Connection state shared by both plugin generations.
#[derive(Debug, Default)]
struct Connection {
    root: Mutex<Option<RootCredentials>>,
    template: Mutex<Option<StringTemplate>>,
    closed: AtomicBool,
}

impl Connection {
    fn configure(&self, db: &MockDatabase, config: &Map<String, Value>, verify: bool) -> PluginResult<()> {
        if let Some(url) = config.get("connection_url").and_then(Value::as_str) {
            let probe = url.replace("{{username}}", "u").replace("{{password}}", "p");
            url::Url::parse(&probe).map_err(|e| PluginError::database(format!("parse {url:?}: {e}")))?;
        }
        let root = RootCredentials {
            username: str_field(config, "username"),
            password: str_field(config, "password"),
        };
        if verify {
            db.login(&root)
                .map_err(|e| PluginError::database(format!("failed to verify connection: {e}")))?;
        }
        let template = match config.get("username_template").and_then(Value::as_str) {
            Some(src) => StringTemplate::new(src),
            None => StringTemplate::new(DEFAULT_USERNAME_TEMPLATE),
        }
        .map_err(|e| PluginError::InvalidRequest(format!("unable to initialize username template: {e}")))?;

        *self.root.lock() = Some(root);
        *self.template.lock() = Some(template);
        Ok(())
    }

    fn session(&self, db: &MockDatabase) -> PluginResult<RootCredentials> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PluginError::Closed);
        }
        let root = self
            .root
            .lock()
            .clone()
            .ok_or_else(|| PluginError::database("plugin is not initialized"))?;
        db.login(&root)?;
        Ok(root)
    }

    fn username(&self, meta: &UsernameMetadata) -> PluginResult<String> {
        let fields = BTreeMap::from([
            ("DisplayName".to_string(), meta.display_name.clone()),
            ("RoleName".to_string(), meta.role_name.clone()),
        ]);
        self.template
            .lock()
            .as_ref()
            .ok_or_else(|| PluginError::database("plugin is not initialized"))?
            .generate(&fields)
            .map_err(|e| PluginError::database(e.to_string()))
    }

    fn set_root_password(&self, username: &str, password: &str) {
        if let Some(root) = self.root.lock().as_mut() {
            if root.username == username {
                root.password = password.to_string();
            }
        }
    }
}

fn str_field(config: &Map<String, Value>, key: &str) -> String {
    config.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn generate_password() -> PluginResult<String> {
    StringGenerator::default_password()
        .and_then(|g| g.generate())
        .map_err(|e| PluginError::database(e.to_string()))
}

/// v5 plugin backed by a [`MockDatabase`].
#[derive(Debug)]
pub struct MockDatabaseV5 {
    type_name: String,
    db: MockDatabase,
    conn: Connection,
}

impl MockDatabaseV5 {
    /// Plugin reporting `type_name` against `db`.
    #[must_use]
    pub fn new(type_name: impl Into<String>, db: MockDatabase) -> Self {
        Self {
            type_name: type_name.into(),
            db,
            conn: Connection::default(),
        }
    }
}

#[async_trait]
impl DatabaseV5 for MockDatabaseV5 {
    async fn initialize(&self, req: InitializeRequest) -> PluginResult<InitializeResponse> {
        self.conn.configure(&self.db, &req.config, req.verify_connection)?;
        Ok(InitializeResponse { config: req.config })
    }

    async fn new_user(&self, req: NewUserRequest) -> PluginResult<NewUserResponse> {
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        if req.statements.commands.is_empty() {
            return Err(PluginError::InvalidRequest("no creation statements provided".to_string()));
        }
        let username = self.conn.username(&req.username_config)?;
        let user = match req.credential_type {
            CredentialType::Password => MockUser {
                password: req.password,
                expiration: Some(req.expiration),
                statements: req.statements.commands,
                ..MockUser::default()
            },
            CredentialType::RsaPrivateKey => MockUser {
                public_key: req.public_key,
                expiration: Some(req.expiration),
                statements: req.statements.commands,
                ..MockUser::default()
            },
        };
        self.db.create(&username, user)?;
        Ok(NewUserResponse { username })
    }

    async fn update_user(&self, req: UpdateUserRequest) -> PluginResult<UpdateUserResponse> {
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        if let Some(change) = req.password {
            self.db
                .update(&req.username, |u| u.password.clone_from(&change.new_password))?;
            self.conn.set_root_password(&req.username, &change.new_password);
        }
        if let Some(change) = req.public_key {
            self.db
                .update(&req.username, |u| u.public_key.clone_from(&change.new_public_key))?;
        }
        if let Some(change) = req.expiration {
            self.db
                .update(&req.username, |u| u.expiration = Some(change.new_expiration))?;
        }
        Ok(UpdateUserResponse {})
    }

    async fn delete_user(&self, req: DeleteUserRequest) -> PluginResult<DeleteUserResponse> {
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        self.db.remove(&req.username);
        Ok(DeleteUserResponse {})
    }

    async fn type_name(&self) -> PluginResult<String> {
        Ok(self.type_name.clone())
    }

    async fn close(&self) -> PluginResult<()> {
        self.conn.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Capabilities of a [`MockDatabaseV4`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V4Options {
    /// Whether `SetCredentials` is implemented
    pub set_credentials: bool,
    /// Whether `RenewUser` is implemented
    pub renew_user: bool,
}

impl Default for V4Options {
    fn default() -> Self {
        Self {
            set_credentials: true,
            renew_user: true,
        }
    }
}

/// Legacy v4 plugin backed by a [`MockDatabase`]. Generates its own
/// passwords.
#[derive(Debug)]
pub struct MockDatabaseV4 {
    type_name: String,
    db: MockDatabase,
    options: V4Options,
    conn: Connection,
    config: Mutex<Map<String, Value>>,
}

impl MockDatabaseV4 {
    /// Plugin reporting `type_name` against `db`.
    #[must_use]
    pub fn new(type_name: impl Into<String>, db: MockDatabase, options: V4Options) -> Self {
        Self {
            type_name: type_name.into(),
            db,
            options,
            conn: Connection::default(),
            config: Mutex::new(Map::new()),
        }
    }
}

#[async_trait]
impl DatabaseV4 for MockDatabaseV4 {
    async fn type_name(&self) -> PluginResult<String> {
        Ok(self.type_name.clone())
    }

    async fn create_user(
        &self,
        statements: StatementsV4,
        username_config: UsernameMetadata,
        expiration: DateTime<Utc>,
    ) -> PluginResult<(String, String)> {
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        if statements.creation.is_empty() {
            return Err(PluginError::InvalidRequest("no creation statements provided".to_string()));
        }
        let username = self.conn.username(&username_config)?;
        let password = generate_password()?;
        self.db.create(
            &username,
            MockUser {
                password: password.clone(),
                expiration: Some(expiration),
                statements: statements.creation,
                ..MockUser::default()
            },
        )?;
        Ok((username, password))
    }

    async fn renew_user(&self, _statements: StatementsV4, username: &str, expiration: DateTime<Utc>) -> PluginResult<()> {
        if !self.options.renew_user {
            return Err(PluginError::Unimplemented("RenewUser".to_string()));
        }
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        self.db.update(username, |u| u.expiration = Some(expiration))
    }

    async fn revoke_user(&self, _statements: StatementsV4, username: &str) -> PluginResult<()> {
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        self.db.remove(username);
        Ok(())
    }

    async fn rotate_root_credentials(&self, _statements: Vec<String>) -> PluginResult<Map<String, Value>> {
        let root = self.conn.session(&self.db)?;
        self.db.check_failure()?;
        let password = generate_password()?;
        self.db.update(&root.username, |u| u.password.clone_from(&password))?;
        self.conn.set_root_password(&root.username, &password);

        let mut config = self.config.lock();
        config.insert("password".to_string(), Value::String(password));
        Ok(config.clone())
    }

    async fn init(&self, config: Map<String, Value>, verify_connection: bool) -> PluginResult<Map<String, Value>> {
        self.conn.configure(&self.db, &config, verify_connection)?;
        self.config.lock().clone_from(&config);
        Ok(config)
    }

    async fn set_credentials(
        &self,
        _statements: StatementsV4,
        static_user: StaticUserConfig,
    ) -> PluginResult<(String, String)> {
        if !self.options.set_credentials {
            return Err(PluginError::Unimplemented("SetCredentials".to_string()));
        }
        self.conn.session(&self.db)?;
        self.db.check_failure()?;
        self.db
            .update(&static_user.username, |u| u.password.clone_from(&static_user.password))?;
        self.conn.set_root_password(&static_user.username, &static_user.password);
        Ok((static_user.username, static_user.password))
    }

    async fn generate_credentials(&self) -> PluginResult<String> {
        generate_password()
    }

    async fn close(&self) -> PluginResult<()> {
        self.conn.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
