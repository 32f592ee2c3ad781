//! Object mapping for LDAP directories.
//!
//! [`Entry`] represents one remote directory object. Its attributes are loaded lazily into a
//! change-tracking [`AttributeSet`], and [`Entry::save`] reconciles local edits with the
//! directory using the smallest request that does the job. All network traffic goes through a
//! [`DirectoryClient`]; [`LdapClient`] is the `ldap3`-backed implementation.

#![warn(missing_docs)]

mod client;
mod config;
mod dn;
mod entry;

pub use client::{DirectoryClient, LdapClient, LdapEntry, SearchScope, ALL_OBJECTS_FILTER};
pub use config::{
    BindCredentials, DirectoryConfig, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_OPERATION_TIMEOUT_SECS, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use entry::{Entry, EntryState};
pub use ldapom_core::{AttributeSet, AttributeValue, Change, Error};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = ldapom_core::Result<T>;
