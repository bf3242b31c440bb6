//! Conversions between protocol types and their protobuf messages.

use crate::error::{PluginError, PluginResult};
use crate::proto;
use crate::v4::{StatementsV4, StaticUserConfig};
use crate::v5::{
    ChangeExpiration, ChangePassword, ChangePublicKey, CredentialType, DeleteUserRequest, NewUserRequest,
    Statements, UpdateUserRequest, UsernameMetadata,
};
use chrono::{DateTime, TimeZone, Utc};
use prost_types::value::Kind;
use serde_json::{Map, Number, Value};

/// JSON object to protobuf `Struct`.
#[must_use]
pub fn map_to_struct(map: &Map<String, Value>) -> prost_types::Struct {
    prost_types::Struct {
        fields: map.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect(),
    }
}

/// Protobuf `Struct` to JSON object.
#[must_use]
pub fn struct_to_map(s: &prost_types::Struct) -> Map<String, Value> {
    s.fields.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect()
}

fn json_to_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(json_to_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(map_to_struct(map)),
    };
    prost_types::Value { kind: Some(kind) }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn value_to_json(value: &prost_types::Value) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::NumberValue(n)) => {
            // Integral values come back as integers so that fields such as
            // `max_open_connections` keep their JSON type.
            if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                Value::Number(Number::from(*n as i64))
            } else {
                Number::from_f64(*n).map_or(Value::Null, Value::Number)
            }
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => Value::Array(list.values.iter().map(value_to_json).collect()),
        Some(Kind::StructValue(s)) => Value::Object(struct_to_map(s)),
    }
}

/// UTC time to protobuf `Timestamp`.
#[must_use]
pub fn to_timestamp(t: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: t.timestamp(),
        nanos: i32::try_from(t.timestamp_subsec_nanos()).unwrap_or_default(),
    }
}

/// Protobuf `Timestamp` to UTC time.
///
/// # Errors
///
/// Returns an error for a missing or out-of-range timestamp.
pub fn from_timestamp(ts: Option<&prost_types::Timestamp>) -> PluginResult<DateTime<Utc>> {
    let ts = ts.ok_or_else(|| PluginError::InvalidRequest("missing timestamp".to_string()))?;
    let nanos = u32::try_from(ts.nanos).map_err(|_| PluginError::InvalidRequest("negative nanos".to_string()))?;
    Utc.timestamp_opt(ts.seconds, nanos)
        .single()
        .ok_or_else(|| PluginError::InvalidRequest(format!("timestamp out of range: {}", ts.seconds)))
}

/// JSON object to bytes, as carried by v4 messages.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn map_to_json_bytes(map: &Map<String, Value>) -> PluginResult<Vec<u8>> {
    serde_json::to_vec(map).map_err(|e| PluginError::Internal(e.into()))
}

/// Bytes from a v4 message to a JSON object; empty input is an empty map.
///
/// # Errors
///
/// Returns an error if the bytes are not a JSON object.
pub fn json_bytes_to_map(bytes: &[u8]) -> PluginResult<Map<String, Value>> {
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_slice(bytes).map_err(|e| PluginError::Internal(e.into()))
}

fn statements(s: &Statements) -> proto::v5::Statements {
    proto::v5::Statements {
        commands: s.commands.clone(),
    }
}

fn statements_from(s: Option<&proto::v5::Statements>) -> Statements {
    Statements::new(s.map(|s| s.commands.clone()).unwrap_or_default())
}

impl From<&NewUserRequest> for proto::v5::NewUserRequest {
    fn from(req: &NewUserRequest) -> Self {
        Self {
            username_config: Some(proto::v5::UsernameConfig {
                display_name: req.username_config.display_name.clone(),
                role_name: req.username_config.role_name.clone(),
            }),
            password: req.password.clone(),
            expiration: Some(to_timestamp(req.expiration)),
            statements: Some(statements(&req.statements)),
            rollback_statements: Some(statements(&req.rollback_statements)),
            credential_type: req.credential_type.to_proto(),
            public_key: req.public_key.clone(),
        }
    }
}

impl TryFrom<proto::v5::NewUserRequest> for NewUserRequest {
    type Error = PluginError;

    fn try_from(req: proto::v5::NewUserRequest) -> PluginResult<Self> {
        let username_config = req.username_config.unwrap_or_default();
        Ok(Self {
            username_config: UsernameMetadata {
                display_name: username_config.display_name,
                role_name: username_config.role_name,
            },
            statements: statements_from(req.statements.as_ref()),
            rollback_statements: statements_from(req.rollback_statements.as_ref()),
            credential_type: CredentialType::from_proto(req.credential_type),
            password: req.password,
            public_key: req.public_key,
            expiration: from_timestamp(req.expiration.as_ref())?,
        })
    }
}

impl From<&UpdateUserRequest> for proto::v5::UpdateUserRequest {
    fn from(req: &UpdateUserRequest) -> Self {
        Self {
            username: req.username.clone(),
            password: req.password.as_ref().map(|p| proto::v5::ChangePassword {
                new_password: p.new_password.clone(),
                statements: Some(statements(&p.statements)),
            }),
            expiration: req.expiration.as_ref().map(|e| proto::v5::ChangeExpiration {
                new_expiration: Some(to_timestamp(e.new_expiration)),
                statements: Some(statements(&e.statements)),
            }),
            public_key: req.public_key.as_ref().map(|k| proto::v5::ChangePublicKey {
                new_public_key: k.new_public_key.clone(),
                statements: Some(statements(&k.statements)),
            }),
            credential_type: req.credential_type.to_proto(),
        }
    }
}

impl TryFrom<proto::v5::UpdateUserRequest> for UpdateUserRequest {
    type Error = PluginError;

    fn try_from(req: proto::v5::UpdateUserRequest) -> PluginResult<Self> {
        Ok(Self {
            username: req.username,
            credential_type: CredentialType::from_proto(req.credential_type),
            password: req.password.map(|p| ChangePassword {
                statements: statements_from(p.statements.as_ref()),
                new_password: p.new_password,
            }),
            public_key: req.public_key.map(|k| ChangePublicKey {
                statements: statements_from(k.statements.as_ref()),
                new_public_key: k.new_public_key,
            }),
            expiration: req
                .expiration
                .map(|e| {
                    Ok::<_, PluginError>(ChangeExpiration {
                        new_expiration: from_timestamp(e.new_expiration.as_ref())?,
                        statements: statements_from(e.statements.as_ref()),
                    })
                })
                .transpose()?,
        })
    }
}

impl From<&DeleteUserRequest> for proto::v5::DeleteUserRequest {
    fn from(req: &DeleteUserRequest) -> Self {
        Self {
            username: req.username.clone(),
            statements: Some(statements(&req.statements)),
        }
    }
}

impl From<&StatementsV4> for proto::v4::Statements {
    fn from(s: &StatementsV4) -> Self {
        Self {
            creation: s.creation.clone(),
            revocation: s.revocation.clone(),
            rollback: s.rollback.clone(),
            renewal: s.renewal.clone(),
            rotation: s.rotation.clone(),
        }
    }
}

impl From<&StaticUserConfig> for proto::v4::StaticUserConfig {
    fn from(c: &StaticUserConfig) -> Self {
        Self {
            username: c.username.clone(),
            password: c.password.clone(),
            create: c.create,
        }
    }
}
