//! Connection settings for the directory server.

use crate::dn::DistinguishedName;
use ldapom_core::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;
/// Shortest accepted timeout (seconds).
pub const MIN_TIMEOUT_SECS: u64 = 1;
/// Longest accepted timeout (seconds).
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Identity the client binds as before every operation.
#[derive(Debug)]
pub struct BindCredentials {
    bind_dn: DistinguishedName,
    password: SecretString,
}

impl BindCredentials {
    /// Creates bind credentials.
    #[must_use]
    pub fn new(bind_dn: DistinguishedName, password: impl Into<String>) -> Self {
        Self {
            bind_dn,
            password: SecretString::from(password.into()),
        }
    }

    /// The distinguished name to bind as.
    #[must_use]
    pub const fn bind_dn(&self) -> &DistinguishedName {
        &self.bind_dn
    }

    /// The bind password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Configuration for connecting to a directory server.
#[derive(Debug)]
pub struct DirectoryConfig {
    url: String,
    credentials: BindCredentials,
    base_dn: Option<DistinguishedName>,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    connection_timeout_secs: u64,
    operation_timeout_secs: u64,
}

impl DirectoryConfig {
    /// Creates a configuration with default TLS and timeout settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the provided URL is invalid or not an `ldap`/`ldaps`/`ldapi` URL.
    pub fn new(url: impl Into<String>, credentials: BindCredentials) -> Result<Self> {
        let url = url.into();
        let parsed = Url::parse(&url)?;
        if !matches!(parsed.scheme(), "ldap" | "ldaps" | "ldapi") {
            return Err(Error::InvalidEndpoint(format!(
                "unsupported directory URL scheme `{}`",
                parsed.scheme()
            )));
        }

        Ok(Self {
            url,
            credentials,
            base_dn: None,
            tls_verify: true,
            tls_ca_cert: None,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        })
    }

    /// Loads and validates a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the document does not parse or fails validation, and the
    /// errors of [`DirectoryConfig::new`] for a bad URL.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: ConfigDocument = serde_json::from_str(json)
            .map_err(|err| Error::ConfigError(format!("invalid directory configuration: {err}")))?;
        document.validate()?;

        let bind_dn = DistinguishedName::parse(&document.bind_dn)?;
        let mut config = Self::new(
            document.url,
            BindCredentials::new(bind_dn, document.bind_password),
        )?
        .with_tls_verification(document.tls_verify)
        .with_connection_timeout_secs(document.connection_timeout_secs)
        .with_operation_timeout_secs(document.operation_timeout_secs);
        if let Some(path) = document.tls_ca_cert {
            config = config.with_tls_ca_cert(path);
        }
        if let Some(base_dn) = document.base_dn {
            config = config.with_base_dn(DistinguishedName::parse(&base_dn)?);
        }
        Ok(config)
    }

    /// Returns the directory URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the bind credentials.
    #[must_use]
    pub const fn credentials(&self) -> &BindCredentials {
        &self.credentials
    }

    /// Returns the naming context entries are addressed under, if configured.
    #[must_use]
    pub const fn base_dn(&self) -> Option<&DistinguishedName> {
        self.base_dn.as_ref()
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Sets the naming context entries are addressed under.
    #[must_use]
    pub fn with_base_dn(mut self, base_dn: DistinguishedName) -> Self {
        self.base_dn = Some(base_dn);
        self
    }

    /// Overrides the connection timeout in seconds, clamped to
    /// [`MIN_TIMEOUT_SECS`]..=[`MAX_TIMEOUT_SECS`].
    #[must_use]
    pub fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self
    }

    /// Overrides the operation timeout in seconds, clamped to
    /// [`MIN_TIMEOUT_SECS`]..=[`MAX_TIMEOUT_SECS`].
    #[must_use]
    pub fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self
    }
}

#[derive(Debug, Deserialize, Validate)]
struct ConfigDocument {
    #[validate(url)]
    url: String,
    #[validate(length(min = 1))]
    bind_dn: String,
    bind_password: String,
    #[serde(default)]
    base_dn: Option<String>,
    #[serde(default = "default_tls_verify")]
    tls_verify: bool,
    #[serde(default)]
    tls_ca_cert: Option<PathBuf>,
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    connection_timeout_secs: u64,
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_operation_timeout_secs")]
    operation_timeout_secs: u64,
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> BindCredentials {
        BindCredentials::new(
            DistinguishedName::parse("cn=admin,dc=example,dc=com").unwrap(),
            "secret",
        )
    }

    #[test]
    fn builder_overrides() {
        let config = DirectoryConfig::new("ldaps://ldap.example.com", credentials())
            .unwrap()
            .with_connection_timeout_secs(20)
            .with_operation_timeout_secs(30)
            .with_tls_verification(false)
            .with_tls_ca_cert(PathBuf::from("/etc/ssl/ldap-ca.pem"));

        assert_eq!(config.url(), "ldaps://ldap.example.com");
        assert_eq!(config.connection_timeout(), Duration::from_secs(20));
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert!(!config.tls_verify());
        assert_eq!(
            config.tls_ca_cert(),
            Some(&PathBuf::from("/etc/ssl/ldap-ca.pem"))
        );
        assert_eq!(
            config.credentials().bind_dn().as_str(),
            "cn=admin,dc=example,dc=com"
        );
        assert_eq!(config.credentials().password(), "secret");
    }

    #[test]
    fn builder_clamps_timeouts() {
        let config = DirectoryConfig::new("ldap://localhost", credentials())
            .unwrap()
            .with_operation_timeout_secs(0)
            .with_connection_timeout_secs(3600);

        assert_eq!(config.operation_timeout(), Duration::from_secs(MIN_TIMEOUT_SECS));
        assert_eq!(config.connection_timeout(), Duration::from_secs(MAX_TIMEOUT_SECS));
    }

    #[test]
    fn base_dn_is_optional() {
        let config = DirectoryConfig::new("ldap://localhost", credentials()).unwrap();
        assert!(config.base_dn().is_none());

        let base = DistinguishedName::parse("dc=example,dc=com").unwrap();
        let config = config.with_base_dn(base.clone());
        assert_eq!(config.base_dn(), Some(&base));
    }

    #[test]
    fn rejects_non_ldap_urls() {
        assert!(matches!(
            DirectoryConfig::new("https://ldap.example.com", credentials()),
            Err(Error::InvalidEndpoint(_))
        ));
        assert!(matches!(
            DirectoryConfig::new("not a url", credentials()),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let config = DirectoryConfig::new("ldap://localhost", credentials()).unwrap();
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn from_json_applies_defaults() {
        let config = DirectoryConfig::from_json(
            r#"{
                "url": "ldap://localhost:389",
                "bind_dn": "cn=admin,dc=example,dc=com",
                "bind_password": "secret"
            }"#,
        )
        .unwrap();

        assert!(config.tls_verify());
        assert!(config.base_dn().is_none());
        assert_eq!(
            config.operation_timeout(),
            Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS)
        );
        assert_eq!(config.credentials().password(), "secret");
    }

    #[test]
    fn from_json_reads_base_dn() {
        let config = DirectoryConfig::from_json(
            r#"{
                "url": "ldaps://ldap.example.com",
                "bind_dn": "cn=admin,dc=example,dc=com",
                "bind_password": "secret",
                "base_dn": "ou=People, dc=example, dc=com"
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.base_dn().map(DistinguishedName::as_str),
            Some("ou=People,dc=example,dc=com")
        );

        let err = DirectoryConfig::from_json(
            r#"{"url": "ldap://localhost", "bind_dn": "cn=admin", "bind_password": "x", "base_dn": "nonsense"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn from_json_validates() {
        let err = DirectoryConfig::from_json(
            r#"{
                "url": "ldap://localhost",
                "bind_dn": "cn=admin,dc=example,dc=com",
                "bind_password": "secret",
                "operation_timeout_secs": 0
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));

        let err = DirectoryConfig::from_json(
            r#"{"url": "ldap://localhost", "bind_dn": "admin", "bind_password": "x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        assert!(matches!(
            DirectoryConfig::from_json("{"),
            Err(Error::ConfigError(_))
        ));
    }
}
