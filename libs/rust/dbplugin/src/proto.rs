//! Protobuf messages of the plugin RPC services.
//!
//! Service `dbplugin.v5.Database` and the legacy `dbplugin.v4.Database`.
//! Messages are declared with `prost` derives directly so the crate builds
//! without a protobuf compiler.

#![allow(missing_docs)]

/// Messages of `dbplugin.v5`.
pub mod v5 {
    /// Fully qualified service name.
    pub const SERVICE: &str = "dbplugin.v5.Database";

    pub const INITIALIZE: &str = "/dbplugin.v5.Database/Initialize";
    pub const NEW_USER: &str = "/dbplugin.v5.Database/NewUser";
    pub const UPDATE_USER: &str = "/dbplugin.v5.Database/UpdateUser";
    pub const DELETE_USER: &str = "/dbplugin.v5.Database/DeleteUser";
    pub const TYPE: &str = "/dbplugin.v5.Database/Type";
    pub const CLOSE: &str = "/dbplugin.v5.Database/Close";

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InitializeRequest {
        #[prost(message, optional, tag = "1")]
        pub config_data: ::core::option::Option<::prost_types::Struct>,
        #[prost(bool, tag = "2")]
        pub verify_connection: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InitializeResponse {
        #[prost(message, optional, tag = "1")]
        pub config_data: ::core::option::Option<::prost_types::Struct>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UsernameConfig {
        #[prost(string, tag = "1")]
        pub display_name: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub role_name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Statements {
        #[prost(string, repeated, tag = "1")]
        pub commands: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NewUserRequest {
        #[prost(message, optional, tag = "1")]
        pub username_config: ::core::option::Option<UsernameConfig>,
        #[prost(string, tag = "2")]
        pub password: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "3")]
        pub expiration: ::core::option::Option<::prost_types::Timestamp>,
        #[prost(message, optional, tag = "4")]
        pub statements: ::core::option::Option<Statements>,
        #[prost(message, optional, tag = "5")]
        pub rollback_statements: ::core::option::Option<Statements>,
        #[prost(int32, tag = "6")]
        pub credential_type: i32,
        #[prost(bytes = "vec", tag = "7")]
        pub public_key: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NewUserResponse {
        #[prost(string, tag = "1")]
        pub username: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChangePassword {
        #[prost(string, tag = "1")]
        pub new_password: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub statements: ::core::option::Option<Statements>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChangePublicKey {
        #[prost(bytes = "vec", tag = "1")]
        pub new_public_key: ::prost::alloc::vec::Vec<u8>,
        #[prost(message, optional, tag = "2")]
        pub statements: ::core::option::Option<Statements>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChangeExpiration {
        #[prost(message, optional, tag = "1")]
        pub new_expiration: ::core::option::Option<::prost_types::Timestamp>,
        #[prost(message, optional, tag = "2")]
        pub statements: ::core::option::Option<Statements>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UpdateUserRequest {
        #[prost(string, tag = "1")]
        pub username: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub password: ::core::option::Option<ChangePassword>,
        #[prost(message, optional, tag = "3")]
        pub expiration: ::core::option::Option<ChangeExpiration>,
        #[prost(message, optional, tag = "4")]
        pub public_key: ::core::option::Option<ChangePublicKey>,
        #[prost(int32, tag = "5")]
        pub credential_type: i32,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct UpdateUserResponse {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeleteUserRequest {
        #[prost(string, tag = "1")]
        pub username: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "2")]
        pub statements: ::core::option::Option<Statements>,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct DeleteUserResponse {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TypeResponse {
        #[prost(string, tag = "1")]
        pub r#type: ::prost::alloc::string::String,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Empty {}
}

/// Messages of `dbplugin.v4`.
pub mod v4 {
    /// Fully qualified service name.
    pub const SERVICE: &str = "dbplugin.v4.Database";

    pub const TYPE: &str = "/dbplugin.v4.Database/Type";
    pub const CREATE_USER: &str = "/dbplugin.v4.Database/CreateUser";
    pub const RENEW_USER: &str = "/dbplugin.v4.Database/RenewUser";
    pub const REVOKE_USER: &str = "/dbplugin.v4.Database/RevokeUser";
    pub const ROTATE_ROOT_CREDENTIALS: &str = "/dbplugin.v4.Database/RotateRootCredentials";
    pub const INIT: &str = "/dbplugin.v4.Database/Init";
    pub const SET_CREDENTIALS: &str = "/dbplugin.v4.Database/SetCredentials";
    pub const GENERATE_CREDENTIALS: &str = "/dbplugin.v4.Database/GenerateCredentials";
    pub const CLOSE: &str = "/dbplugin.v4.Database/Close";

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Statements {
        #[prost(string, repeated, tag = "5")]
        pub creation: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        #[prost(string, repeated, tag = "6")]
        pub revocation: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        #[prost(string, repeated, tag = "7")]
        pub rollback: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        #[prost(string, repeated, tag = "8")]
        pub renewal: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        #[prost(string, repeated, tag = "9")]
        pub rotation: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UsernameConfig {
        #[prost(string, tag = "1")]
        pub display_name: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub role_name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InitRequest {
        /// JSON-encoded connection details
        #[prost(bytes = "vec", tag = "1")]
        pub config: ::prost::alloc::vec::Vec<u8>,
        #[prost(bool, tag = "2")]
        pub verify_connection: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InitResponse {
        #[prost(bytes = "vec", tag = "1")]
        pub config: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CreateUserRequest {
        #[prost(message, optional, tag = "1")]
        pub statements: ::core::option::Option<Statements>,
        #[prost(message, optional, tag = "2")]
        pub username_config: ::core::option::Option<UsernameConfig>,
        #[prost(message, optional, tag = "3")]
        pub expiration: ::core::option::Option<::prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CreateUserResponse {
        #[prost(string, tag = "1")]
        pub username: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub password: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RenewUserRequest {
        #[prost(message, optional, tag = "1")]
        pub statements: ::core::option::Option<Statements>,
        #[prost(string, tag = "2")]
        pub username: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "3")]
        pub expiration: ::core::option::Option<::prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RevokeUserRequest {
        #[prost(message, optional, tag = "1")]
        pub statements: ::core::option::Option<Statements>,
        #[prost(string, tag = "2")]
        pub username: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RotateRootCredentialsRequest {
        #[prost(string, repeated, tag = "1")]
        pub statements: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RotateRootCredentialsResponse {
        #[prost(bytes = "vec", tag = "1")]
        pub config: ::prost::alloc::vec::Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StaticUserConfig {
        #[prost(string, tag = "1")]
        pub username: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub password: ::prost::alloc::string::String,
        #[prost(bool, tag = "3")]
        pub create: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SetCredentialsRequest {
        #[prost(message, optional, tag = "1")]
        pub statements: ::core::option::Option<Statements>,
        #[prost(message, optional, tag = "2")]
        pub static_user_config: ::core::option::Option<StaticUserConfig>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SetCredentialsResponse {
        #[prost(string, tag = "1")]
        pub username: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub password: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GenerateCredentialsResponse {
        #[prost(string, tag = "1")]
        pub password: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TypeResponse {
        #[prost(string, tag = "1")]
        pub r#type: ::prost::alloc::string::String,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Empty {}
}
