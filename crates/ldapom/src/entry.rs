//! Directory entries mapped to in-memory objects.
//!
//! An [`Entry`] is created without touching the network. Its attributes are fetched on first
//! access, mutated locally through the owned [`AttributeSet`], and flushed by [`Entry::save`],
//! which sends only the recorded changes (or the full mapping, for an entry that does not exist
//! remotely yet).
//!
//! Mutating methods take `&mut self`, so one entry can never have two saves in flight. Share an
//! entry between tasks through a `tokio::sync::Mutex`.

use crate::client::{DirectoryClient, SearchScope, ALL_OBJECTS_FILTER};
use crate::dn::DistinguishedName;
use ldapom_core::{AttributeSet, Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of an [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Attributes have not been fetched yet.
    Unloaded,
    /// Loaded with no pending changes.
    Clean,
    /// Loaded with pending changes.
    Dirty,
    /// Not created remotely yet.
    New,
    /// Deleted remotely; every further operation fails.
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unloaded,
    Loaded,
    New,
    Deleted,
}

/// One directory object identified by its distinguished name.
pub struct Entry {
    client: Arc<dyn DirectoryClient>,
    dn: DistinguishedName,
    attributes: AttributeSet,
    phase: Phase,
}

impl Entry {
    /// References an existing remote entry. Nothing is fetched until the attributes are needed.
    #[must_use]
    pub fn new(client: Arc<dyn DirectoryClient>, dn: DistinguishedName) -> Self {
        Self {
            client,
            dn,
            attributes: AttributeSet::new(),
            phase: Phase::Unloaded,
        }
    }

    /// Prepares an entry that [`Entry::save`] will create remotely with `attributes`.
    #[must_use]
    pub fn create(
        client: Arc<dyn DirectoryClient>,
        dn: DistinguishedName,
        attributes: AttributeSet,
    ) -> Self {
        Self {
            client,
            dn,
            attributes,
            phase: Phase::New,
        }
    }

    /// The entry's distinguished name.
    #[must_use]
    pub const fn dn(&self) -> &DistinguishedName {
        &self.dn
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EntryState {
        match self.phase {
            Phase::Unloaded => EntryState::Unloaded,
            Phase::Loaded if self.attributes.has_changes() => EntryState::Dirty,
            Phase::Loaded => EntryState::Clean,
            Phase::New => EntryState::New,
            Phase::Deleted => EntryState::Deleted,
        }
    }

    /// Returns true once attributes have been fetched or the entry was created.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.phase == Phase::Loaded
    }

    /// Returns true until a new entry has been saved.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.phase == Phase::New
    }

    /// Returns true when loaded with no pending changes.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.state() == EntryState::Clean
    }

    /// Fetches the attributes from the directory, replacing any local state.
    ///
    /// Unlike the lazy accessors this always issues a search, so unsaved changes are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the directory has no such entry, [`Error::InvalidState`]
    /// for new or deleted entries, and remote failures unchanged.
    pub async fn load_attributes(&mut self) -> Result<&AttributeSet> {
        match self.phase {
            Phase::New => return Err(self.not_created("load")),
            Phase::Deleted => return Err(self.deleted("load")),
            Phase::Unloaded | Phase::Loaded => self.fetch().await?,
        }
        Ok(&self.attributes)
    }

    /// Borrows the attributes, loading them on first access.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Entry::load_attributes`] when a load is needed.
    pub async fn attributes(&mut self) -> Result<&AttributeSet> {
        self.ensure_loaded("read attributes of").await?;
        Ok(&self.attributes)
    }

    /// Mutably borrows the attributes, loading them on first access.
    ///
    /// Changes made through the returned set are recorded and sent by the next [`Entry::save`].
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Entry::load_attributes`] when a load is needed.
    pub async fn attributes_mut(&mut self) -> Result<&mut AttributeSet> {
        self.ensure_loaded("modify attributes of").await?;
        Ok(&mut self.attributes)
    }

    /// Replaces the attribute set wholesale.
    ///
    /// The current attributes are loaded first if needed. The difference between the current
    /// and the new mapping is recorded as changes, so the entry turns dirty only if the values
    /// actually differ.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Entry::load_attributes`] when a load is needed.
    pub async fn set_attributes(&mut self, attributes: AttributeSet) -> Result<()> {
        self.ensure_loaded("replace attributes of").await?;
        if self.attributes.replace_with(attributes) {
            debug!(dn = %self.dn, changes = self.attributes.changes().len(), "attributes replaced");
        }
        Ok(())
    }

    /// Writes pending changes to the directory.
    ///
    /// A new entry is created with its full mapping. A loaded entry sends its change log as one
    /// modify request and clears the log once the directory acknowledged it. Without pending
    /// changes nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] for deleted entries and remote failures unchanged. On
    /// failure the change log and state are left as they were.
    pub async fn save(&mut self) -> Result<&mut Self> {
        match self.phase {
            Phase::Deleted => return Err(self.deleted("save")),
            Phase::New => {
                self.client.add(&self.dn, &self.attributes).await?;
                self.attributes.discard_changes();
                self.phase = Phase::Loaded;
                info!(dn = %self.dn, attributes = self.attributes.len(), "directory entry created");
            }
            Phase::Loaded if self.attributes.has_changes() => {
                self.client
                    .modify(&self.dn, self.attributes.changes())
                    .await?;
                debug!(dn = %self.dn, changes = self.attributes.changes().len(), "changes saved");
                self.attributes.discard_changes();
            }
            Phase::Unloaded | Phase::Loaded => {
                debug!(dn = %self.dn, "no pending changes to save");
            }
        }
        Ok(self)
    }

    /// Deletes the entry from the directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] for new (never created) or already deleted entries, without
    /// contacting the directory, and remote failures unchanged.
    pub async fn delete(&mut self) -> Result<&Self> {
        match self.phase {
            Phase::New => Err(self.not_created("delete")),
            Phase::Deleted => Err(self.deleted("delete")),
            Phase::Unloaded | Phase::Loaded => {
                self.client.delete(&self.dn).await?;
                self.phase = Phase::Deleted;
                info!(dn = %self.dn, "directory entry deleted");
                Ok(self)
            }
        }
    }

    async fn ensure_loaded(&mut self, action: &str) -> Result<()> {
        match self.phase {
            Phase::Unloaded => self.fetch().await,
            Phase::Deleted => Err(self.deleted(action)),
            Phase::Loaded | Phase::New => Ok(()),
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        debug!(dn = %self.dn, "loading entry attributes");
        let entries = self
            .client
            .search(&self.dn, ALL_OBJECTS_FILTER, SearchScope::Base, 1)
            .await?;
        if entries.len() > 1 {
            warn!(dn = %self.dn, count = entries.len(), "base search returned extra entries");
        }

        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("directory entry `{}`", self.dn)))?;
        if let Some(returned) = entry.distinguished_name() {
            if returned != self.dn {
                debug!(dn = %self.dn, returned = %returned, "directory spells the entry DN differently");
            }
        }
        self.attributes = AttributeSet::from_snapshot(entry.attributes)?;
        self.phase = Phase::Loaded;
        Ok(())
    }

    fn deleted(&self, action: &str) -> Error {
        Error::InvalidState(format!("cannot {action} deleted entry `{}`", self.dn))
    }

    fn not_created(&self, action: &str) -> Error {
        Error::InvalidState(format!(
            "cannot {action} entry `{}` before it is created",
            self.dn
        ))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("dn", &self.dn)
            .field("state", &self.state())
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
