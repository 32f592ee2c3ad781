//! Change-tracking attribute container.
//!
//! [`AttributeSet`] holds the attributes of one directory entry and records every mutation made
//! through [`AttributeSet::set`] and [`AttributeSet::delete`] as a [`Change`]. Replaying the change
//! log, in order, against the baseline the set was created from reproduces the current mapping.
//! The set never talks to the network; the owning entry replays the log against the directory.
//!
//! Attribute names compare ignoring ASCII case, as directory servers treat them. The spelling
//! an attribute was first stored under is kept, both in the mapping and in later change records.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};

/// Value of a directory attribute.
///
/// Directory attributes are multi-valued, so both variants compare by their ordered list of
/// values: `Single("a")` equals `Multi(vec!["a"])`. An empty `Multi` is the absent value.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A single value.
    Single(String),
    /// An ordered sequence of values.
    Multi(Vec<String>),
}

impl AttributeValue {
    /// The absent value. Storing it removes the attribute.
    #[must_use]
    pub const fn absent() -> Self {
        Self::Multi(Vec::new())
    }

    /// Borrows all values in order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multi(values) => values,
        }
    }

    /// Returns the first value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.as_slice().first().map(String::as_str)
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns true for the absent value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Consumes the value, returning the values in order.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Single(value) => vec![value],
            Self::Multi(values) => values,
        }
    }

    // A directory stores a set of values per attribute, so repeats would be lost remotely.
    fn without_duplicates(self) -> Self {
        match self {
            Self::Single(_) => self,
            Self::Multi(values) => {
                let mut seen = HashSet::with_capacity(values.len());
                Self::Multi(
                    values
                        .into_iter()
                        .filter(|value| seen.insert(value.clone()))
                        .collect(),
                )
            }
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => f.write_str(value),
            Self::Multi(values) => write!(f, "[{}]", values.join(", ")),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multi(values.into_iter().map(str::to_string).collect())
    }
}

impl<T> From<Option<T>> for AttributeValue
where
    T: Into<AttributeValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Self::absent, Into::into)
    }
}

/// One pending mutation to be sent to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Change {
    /// Attribute did not exist and was added.
    Add {
        /// Attribute name.
        attribute: String,
        /// Added value.
        value: AttributeValue,
    },
    /// Attribute existed and its value was replaced.
    Replace {
        /// Attribute name.
        attribute: String,
        /// Replacement value.
        value: AttributeValue,
    },
    /// Attribute was removed.
    Delete {
        /// Attribute name.
        attribute: String,
    },
}

impl Change {
    /// Creates an `Add` record.
    #[must_use]
    pub fn add(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::Add {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Creates a `Replace` record.
    #[must_use]
    pub fn replace(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::Replace {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Creates a `Delete` record.
    #[must_use]
    pub fn delete(attribute: impl Into<String>) -> Self {
        Self::Delete {
            attribute: attribute.into(),
        }
    }

    /// Name of the attribute this record targets.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Replace { attribute, .. }
            | Self::Delete { attribute } => attribute,
        }
    }

    /// Applies this record to `attributes`, matching the name ignoring ASCII case.
    pub fn apply_to(&self, attributes: &mut BTreeMap<String, AttributeValue>) {
        let existing = attributes
            .keys()
            .find(|name| name.eq_ignore_ascii_case(self.attribute()))
            .cloned();
        match self {
            Self::Add { attribute, value } | Self::Replace { attribute, value } => {
                attributes.insert(existing.unwrap_or_else(|| attribute.clone()), value.clone());
            }
            Self::Delete { .. } => {
                if let Some(name) = existing {
                    attributes.remove(&name);
                }
            }
        }
    }
}

/// Attribute name as stored, ordered and compared ignoring ASCII case.
#[derive(Debug, Clone)]
struct AttributeName(String);

impl AttributeName {
    fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|byte| byte.to_ascii_lowercase())
    }
}

impl PartialEq for AttributeName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for AttributeName {}

impl PartialOrd for AttributeName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

/// Attribute mapping of one directory entry plus the log of changes made to it.
///
/// Keys iterate in name order, ignoring case. Equality compares the mappings only; two sets
/// holding the same attributes are equal regardless of how they got there.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    attributes: BTreeMap<AttributeName, AttributeValue>,
    changes: Vec<Change>,
}

impl AttributeSet {
    /// Creates an empty set with an empty change log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from a snapshot that is already persisted.
    ///
    /// The snapshot is the baseline, so the change log starts empty. Absent values are skipped
    /// and repeated values within one attribute are collapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any attribute name is malformed.
    pub fn from_snapshot<I, K, V>(snapshot: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        let mut attributes = BTreeMap::new();
        for (name, value) in snapshot {
            let name = name.into();
            validate_name(&name)?;
            let value = value.into().without_duplicates();
            if !value.is_empty() {
                attributes.insert(AttributeName(name), value);
            }
        }

        Ok(Self {
            attributes,
            changes: Vec::new(),
        })
    }

    /// Returns the value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(&AttributeName::new(name))
    }

    /// Returns true if the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(&AttributeName::new(name))
    }

    /// Sets an attribute and records the change.
    ///
    /// A new attribute records `Add`, a different value records `Replace`, and an equal value
    /// records nothing. An existing attribute keeps its stored spelling however `name` is cased.
    /// Repeated values are collapsed to their first occurrence. Setting the absent value behaves
    /// exactly like [`AttributeSet::delete`], including its return value. Otherwise returns the
    /// stored value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the attribute name is malformed.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<Option<AttributeValue>> {
        validate_name(name)?;
        let value = value.into().without_duplicates();
        if value.is_empty() {
            return self.delete(name);
        }

        let key = AttributeName::new(name);
        let change = match self.attributes.get_key_value(&key) {
            None => Change::add(name, value.clone()),
            Some((_, current)) if *current == value => return Ok(Some(value)),
            Some((stored, _)) => Change::replace(stored.as_str(), value.clone()),
        };
        // Inserting under an equal key keeps the stored spelling.
        self.attributes.insert(key, value.clone());
        self.changes.push(change);

        Ok(Some(value))
    }

    /// Removes an attribute and records the change.
    ///
    /// Returns the removed value, or `None` without recording anything if the attribute was not
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the attribute name is malformed.
    pub fn delete(&mut self, name: &str) -> Result<Option<AttributeValue>> {
        validate_name(name)?;
        let removed = self.attributes.remove_entry(&AttributeName::new(name));
        Ok(removed.map(|(stored, value)| {
            self.changes.push(Change::delete(stored.0));
            value
        }))
    }

    /// Iterates over attribute names.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.attributes.keys().map(AttributeName::as_str)
    }

    /// Iterates over attribute values.
    pub fn values(&self) -> impl Iterator<Item = &AttributeValue> + '_ {
        self.attributes.values()
    }

    /// Iterates over `(name, value)` pairs in name order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.attributes.iter(),
        }
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if there are no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Pending changes in the order they were made.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Returns true if any change is pending.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Clears the change log, making the current mapping the new baseline.
    ///
    /// Call only after the directory acknowledged the write that consumed the log.
    pub fn discard_changes(&mut self) {
        self.changes.clear();
    }

    /// Adopts the mapping of `other`, recording the difference as changes.
    ///
    /// The records needed to turn the current mapping into `other`'s (deletions first, then
    /// additions and replacements, each in name order) are appended to this set's log, so pending
    /// changes made before the swap are kept. `other`'s own log is ignored: it describes a
    /// baseline this set knows nothing about. Attributes present in both keep this set's
    /// spelling. Returns true if the mappings differed.
    pub fn replace_with(&mut self, other: AttributeSet) -> bool {
        let mut diff = Vec::new();
        let mut next = BTreeMap::new();

        for name in self.attributes.keys() {
            if !other.attributes.contains_key(name) {
                diff.push(Change::delete(name.as_str()));
            }
        }

        for (name, value) in other.attributes {
            let name = match self.attributes.get_key_value(&name) {
                None => {
                    diff.push(Change::add(name.as_str(), value.clone()));
                    name
                }
                Some((stored, current)) => {
                    if *current != value {
                        diff.push(Change::replace(stored.as_str(), value.clone()));
                    }
                    stored.clone()
                }
            };
            next.insert(name, value);
        }

        let changed = !diff.is_empty();
        self.changes.extend(diff);
        self.attributes = next;
        changed
    }

    /// Copies the current mapping, keyed by stored spelling.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, AttributeValue> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes
    }
}

impl Eq for AttributeSet {}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (name, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

/// Iterator over the `(name, value)` pairs of an [`AttributeSet`], in name order.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    inner: btree_map::Iter<'a, AttributeName, AttributeValue>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a AttributeValue);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(name, value)| (name.as_str(), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = (&'a str, &'a AttributeValue);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// Attribute descriptions: a name or numeric OID, optionally followed by `;option`s.
fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|ch| ch.is_ascii_alphanumeric())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | ';'));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid attribute name `{name}`"
        )))
    }
}
