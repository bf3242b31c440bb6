//! Certificate authority bundle handed to plugins that authenticate with
//! client certificates.

use crate::backend::DatabaseBackend;
use crate::error::BackendResult;
use chrono::{DateTime, Utc};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::info;
use vault_sdk::{Response, StorageEntry};

/// Storage key of the CA bundle.
pub const CA_BUNDLE_KEY: &str = "ca/bundle";

/// A self-signed CA certificate and its key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaBundle {
    /// Certificate PEM
    pub certificate: String,
    /// Private key PEM; never returned to callers
    #[serde(with = "secret_pem")]
    pub private_key: SecretString,
    /// When the bundle was generated
    pub created_at: DateTime<Utc>,
}

mod secret_pem {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
        String::deserialize(deserializer).map(SecretString::from)
    }
}

impl CaBundle {
    /// Generate a CA valid for signing client certificates.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    pub fn generate(common_name: &str, now: DateTime<Utc>) -> BackendResult<Self> {
        let key = KeyPair::generate().map_err(|e| anyhow::anyhow!("generating CA key: {e}"))?;
        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| anyhow::anyhow!("CA parameters: {e}"))?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, common_name);
        params.distinguished_name = name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params
            .self_signed(&key)
            .map_err(|e| anyhow::anyhow!("signing CA certificate: {e}"))?;
        Ok(Self {
            certificate: cert.pem(),
            private_key: SecretString::from(key.serialize_pem()),
            created_at: now,
        })
    }

    /// Private key PEM.
    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        self.private_key.expose_secret()
    }

    fn public_data(&self) -> Map<String, serde_json::Value> {
        let mut data = Map::new();
        data.insert("certificate".into(), json!(self.certificate));
        data.insert("created_at".into(), json!(self.created_at.to_rfc3339()));
        data
    }
}

impl DatabaseBackend {
    /// Stored CA bundle, if one was generated.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a malformed entry.
    pub async fn ca_bundle(&self) -> BackendResult<Option<CaBundle>> {
        match self.store.storage().get(CA_BUNDLE_KEY).await? {
            Some(entry) => Ok(Some(entry.decode_json()?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn ca_read(&self) -> BackendResult<Option<Response>> {
        Ok(self
            .ca_bundle()
            .await?
            .map(|bundle| Response::with_data(bundle.public_data())))
    }

    pub(crate) async fn ca_rotate(&self) -> BackendResult<Option<Response>> {
        let common_name = format!("{} database secrets CA", self.config.mount_path.trim_end_matches('/'));
        let bundle = CaBundle::generate(&common_name, self.clock.now())?;
        self.store
            .storage()
            .put(StorageEntry::from_json(CA_BUNDLE_KEY, &bundle)?)
            .await?;
        info!(created_at = %bundle.created_at, "rotated CA bundle");
        Ok(Some(Response::with_data(bundle.public_data())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::pem::parse_x509_pem;

    #[test]
    fn test_generated_ca_is_a_ca() {
        let bundle = CaBundle::generate("database CA", Utc::now()).unwrap();
        let (_, pem) = parse_x509_pem(bundle.certificate.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        assert!(cert.is_ca());
        assert!(cert.subject().to_string().contains("database CA"));
        assert!(bundle.private_key_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_bundle_serde_keeps_key() {
        let bundle = CaBundle::generate("database CA", Utc::now()).unwrap();
        let encoded = serde_json::to_value(&bundle).unwrap();
        let decoded: CaBundle = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.private_key_pem(), bundle.private_key_pem());
        assert!(!bundle.public_data().contains_key("private_key"));
    }
}
