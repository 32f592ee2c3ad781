//! Directory client: the remote operations entries are reconciled through.

use crate::{
    config::DirectoryConfig,
    dn::{DistinguishedName, RelativeDistinguishedName},
};
use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry, SearchOptions};
use ldapom_core::{AttributeSet, Change, Error, Result};
use native_tls::{Certificate, TlsConnector};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Filter matching every entry; used for base-object reads.
pub const ALL_OBJECTS_FILTER: &str = "(objectClass=*)";

const RC_SUCCESS: u32 = 0;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Represents the search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// One search result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values in the order the server sent them).
    pub attributes: HashMap<String, Vec<String>>,
}

impl LdapEntry {
    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .get(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns all values for the attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes.get(attribute).map(Vec::as_slice)
    }

    /// Parses the DN the server returned, logging a warning if it is malformed.
    #[must_use]
    pub fn distinguished_name(&self) -> Option<DistinguishedName> {
        match DistinguishedName::parse(&self.dn) {
            Ok(dn) => Some(dn),
            Err(err) => {
                warn!(dn = %self.dn, error = %err, "directory returned an unparsable entry DN");
                None
            }
        }
    }
}

// Values that are not valid UTF-8 arrive separately and are not mapped.
fn from_search_entry(entry: SearchEntry) -> LdapEntry {
    if !entry.bin_attrs.is_empty() {
        let skipped: Vec<&str> = entry.bin_attrs.keys().map(String::as_str).collect();
        debug!(dn = %entry.dn, ?skipped, "dropping binary attribute values");
    }
    LdapEntry {
        dn: entry.dn,
        attributes: entry.attrs,
    }
}

/// Remote directory operations.
///
/// Calls are point-in-time round-trips; implementations do not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Searches below `base`, returning at most `size_limit` entries (0 for no limit).
    async fn search(
        &self,
        base: &DistinguishedName,
        filter: &str,
        scope: SearchScope,
        size_limit: i32,
    ) -> Result<Vec<LdapEntry>>;

    /// Creates an entry holding the full attribute mapping.
    async fn add(&self, dn: &DistinguishedName, attributes: &AttributeSet) -> Result<()>;

    /// Applies the change records, in order, as one modify request.
    async fn modify(&self, dn: &DistinguishedName, changes: &[Change]) -> Result<()>;

    /// Deletes an entry.
    async fn delete(&self, dn: &DistinguishedName) -> Result<()>;

    /// Renames an entry within its parent.
    async fn rename(
        &self,
        dn: &DistinguishedName,
        new_rdn: &RelativeDistinguishedName,
        delete_old: bool,
    ) -> Result<()>;

    /// Checks a DN/password combination with a separate bind.
    ///
    /// Returns `Ok(false)` when the server rejects the credentials.
    async fn authenticate(&self, dn: &DistinguishedName, password: &str) -> Result<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapSession: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool>;
    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        size_limit: i32,
    ) -> Result<Vec<LdapEntry>>;
    async fn add(&mut self, dn: &str, attributes: Vec<(String, HashSet<String>)>) -> Result<()>;
    async fn modify(&mut self, dn: &str, mods: Vec<Mod<String>>) -> Result<()>;
    async fn delete(&mut self, dn: &str) -> Result<()>;
    async fn modify_dn(&mut self, dn: &str, rdn: &str, delete_old: bool) -> Result<()>;
    async fn unbind(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Directory client backed by `ldap3`.
///
/// Every call opens a connection, binds with the configured credentials, runs one operation
/// under the operation timeout and unbinds.
pub struct LdapClient {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn LdapConnector>,
}

impl LdapClient {
    /// Creates a client that connects with `ldap3`.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        let config = Arc::new(config);
        let connector: Box<dyn LdapConnector> = Box::new(Ldap3Connector::new(config.clone()));
        Self { config, connector }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_connector(config: DirectoryConfig, connector: Box<dyn LdapConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Names a child of the configured base DN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if no base DN is configured.
    pub fn child_dn(&self, rdn: RelativeDistinguishedName) -> Result<DistinguishedName> {
        let base = self
            .config
            .base_dn()
            .ok_or_else(|| Error::ConfigError("no base DN configured".to_string()))?;
        Ok(base.clone().with_prefix(rdn))
    }

    async fn admin_session(&self) -> Result<Box<dyn LdapSession>> {
        let mut session = self.connector.connect().await?;
        let credentials = self.config.credentials();
        let bound = self
            .execute_with_timeout(
                "bind",
                session.simple_bind(credentials.bind_dn().as_str(), credentials.password()),
            )
            .await?;
        if !bound {
            return Err(Error::remote("bind", "invalid credentials for bind DN"));
        }
        Ok(session)
    }

    async fn finish<T>(&self, mut session: Box<dyn LdapSession>, result: Result<T>) -> Result<T> {
        // The operation's outcome stands even if the unbind fails.
        if let Err(err) = self.execute_with_timeout("unbind", session.unbind()).await {
            warn!(error = %err, "failed to unbind directory session");
        }
        result
    }

    async fn execute_with_timeout<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        timeout(self.config.operation_timeout(), fut)
            .await
            .map_err(|_| Error::Timeout(format!("directory {operation} timed out")))?
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    async fn search(
        &self,
        base: &DistinguishedName,
        filter: &str,
        scope: SearchScope,
        size_limit: i32,
    ) -> Result<Vec<LdapEntry>> {
        debug!(base = %base, filter, ?scope, size_limit, "directory search");
        let mut session = self.admin_session().await?;
        let result = self
            .execute_with_timeout(
                "search",
                session.search(base.as_str(), scope, filter, size_limit),
            )
            .await;
        self.finish(session, result).await
    }

    async fn add(&self, dn: &DistinguishedName, attributes: &AttributeSet) -> Result<()> {
        debug!(dn = %dn, attributes = attributes.len(), "directory add");
        let mut session = self.admin_session().await?;
        let result = self
            .execute_with_timeout("add", session.add(dn.as_str(), to_ldap_attributes(attributes)))
            .await;
        self.finish(session, result).await
    }

    async fn modify(&self, dn: &DistinguishedName, changes: &[Change]) -> Result<()> {
        debug!(dn = %dn, changes = changes.len(), "directory modify");
        let mut session = self.admin_session().await?;
        let result = self
            .execute_with_timeout("modify", session.modify(dn.as_str(), to_ldap_mods(changes)))
            .await;
        self.finish(session, result).await
    }

    async fn delete(&self, dn: &DistinguishedName) -> Result<()> {
        debug!(dn = %dn, "directory delete");
        let mut session = self.admin_session().await?;
        let result = self
            .execute_with_timeout("delete", session.delete(dn.as_str()))
            .await;
        self.finish(session, result).await
    }

    async fn rename(
        &self,
        dn: &DistinguishedName,
        new_rdn: &RelativeDistinguishedName,
        delete_old: bool,
    ) -> Result<()> {
        debug!(dn = %dn, new_rdn = %new_rdn, delete_old, "directory rename");
        let rdn = new_rdn.to_string();
        let mut session = self.admin_session().await?;
        let result = self
            .execute_with_timeout("rename", session.modify_dn(dn.as_str(), &rdn, delete_old))
            .await;
        self.finish(session, result).await
    }

    async fn authenticate(&self, dn: &DistinguishedName, password: &str) -> Result<bool> {
        // An empty password would be an unauthenticated bind, which servers accept.
        if password.is_empty() {
            return Ok(false);
        }

        let mut session = self.connector.connect().await?;
        let result = self
            .execute_with_timeout("bind", session.simple_bind(dn.as_str(), password))
            .await;
        self.finish(session, result).await
    }
}

fn to_ldap_attributes(attributes: &AttributeSet) -> Vec<(String, HashSet<String>)> {
    attributes
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.as_slice().iter().cloned().collect::<HashSet<_>>(),
            )
        })
        .collect()
}

fn to_ldap_mods(changes: &[Change]) -> Vec<Mod<String>> {
    changes
        .iter()
        .map(|change| match change {
            Change::Add { attribute, value } => Mod::Add(
                attribute.clone(),
                value.as_slice().iter().cloned().collect::<HashSet<_>>(),
            ),
            Change::Replace { attribute, value } => Mod::Replace(
                attribute.clone(),
                value.as_slice().iter().cloned().collect::<HashSet<_>>(),
            ),
            // An empty value set removes the whole attribute.
            Change::Delete { attribute } => Mod::Delete(attribute.clone(), HashSet::new()),
        })
        .collect()
}

/// Connector that opens `ldap3` connections.
struct Ldap3Connector {
    config: Arc<DirectoryConfig>,
}

impl Ldap3Connector {
    fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapConnector for Ldap3Connector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let settings = build_ldap_settings(&self.config)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, self.config.url())
            .await
            .map_err(|err| map_ldap_error("connect", &err))?;
        ldap3::drive!(conn);
        Ok(Box::new(Ldap3Session { inner: ldap }))
    }
}

struct Ldap3Session {
    inner: ldap3::Ldap,
}

#[async_trait]
impl LdapSession for Ldap3Session {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool> {
        let result = self
            .inner
            .simple_bind(dn, password)
            .await
            .map_err(|err| map_ldap_error("bind", &err))?;
        if result.rc == RC_INVALID_CREDENTIALS {
            return Ok(false);
        }
        ensure_success("bind", result)?;
        Ok(true)
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        size_limit: i32,
    ) -> Result<Vec<LdapEntry>> {
        let ldap3::SearchResult(entries, result) = self
            .inner
            .with_search_options(SearchOptions::new().sizelimit(size_limit))
            .search(base, scope.into(), filter, vec!["*"])
            .await
            .map_err(|err| map_ldap_error("search", &err))?;

        match result.rc {
            RC_NO_SUCH_OBJECT => return Ok(Vec::new()),
            RC_SUCCESS | RC_SIZE_LIMIT_EXCEEDED => {}
            _ => ensure_success("search", result)?,
        }

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(from_search_entry)
            .collect())
    }

    async fn add(&mut self, dn: &str, attributes: Vec<(String, HashSet<String>)>) -> Result<()> {
        let result = self
            .inner
            .add(dn, attributes)
            .await
            .map_err(|err| map_ldap_error("add", &err))?;
        ensure_success("add", result)
    }

    async fn modify(&mut self, dn: &str, mods: Vec<Mod<String>>) -> Result<()> {
        let result = self
            .inner
            .modify(dn, mods)
            .await
            .map_err(|err| map_ldap_error("modify", &err))?;
        ensure_success("modify", result)
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        let result = self
            .inner
            .delete(dn)
            .await
            .map_err(|err| map_ldap_error("delete", &err))?;
        ensure_success("delete", result)
    }

    async fn modify_dn(&mut self, dn: &str, rdn: &str, delete_old: bool) -> Result<()> {
        let result = self
            .inner
            .modifydn(dn, rdn, delete_old, None)
            .await
            .map_err(|err| map_ldap_error("rename", &err))?;
        ensure_success("rename", result)
    }

    async fn unbind(&mut self) -> Result<()> {
        self.inner
            .unbind()
            .await
            .map_err(|err| map_ldap_error("unbind", &err))
    }
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Error::ConfigError(format!("invalid directory CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to load directory CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn map_ldap_error(operation: &str, err: &ldap3::LdapError) -> Error {
    Error::remote(operation, err.to_string())
}

fn ensure_success(operation: &str, result: ldap3::LdapResult) -> Result<()> {
    result
        .success()
        .map(|_| ())
        .map_err(|err| map_ldap_error(operation, &err))
}
