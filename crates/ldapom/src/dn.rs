//! Distinguished names identifying directory entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use ldapom_core::Error as CoreError;

/// Errors that can occur when parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component had no `=` or was otherwise malformed.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component had nothing to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component had nothing to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// A backslash was not followed by a character or a two-digit hex pair.
    #[error("distinguished name contains an invalid escape sequence")]
    InvalidEscape,
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::InvalidArgument(err.to_string())
    }
}

/// One `attribute=value` pair of a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Creates an RDN from an attribute name and an unescaped value.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Parses a single RDN such as `cn=alice`.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the input is not exactly one component.
    pub fn parse(input: &str) -> Result<Self, DistinguishedNameError> {
        let dn = DistinguishedName::parse(input)?;
        match dn.rdns.as_slice() {
            [single] if single.len() == 1 => Ok(single[0].clone()),
            _ => Err(DistinguishedNameError::InvalidComponent(input.to_string())),
        }
    }

    /// Attribute name (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the attribute name matches, ignoring ASCII case.
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

impl fmt::Display for RelativeDistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, escape_value(&self.value))
    }
}

/// Parsed distinguished name with a canonical string form.
///
/// Each element of [`DistinguishedName::rdns`] is one comma-separated component; multi-valued
/// components (`cn=a+uid=b`) hold more than one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Vec<RelativeDistinguishedName>>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// Backslash escapes of a single character (`\,`) and of a hex pair (`\2C`) are both
    /// accepted. The canonical form re-escapes values with single-character escapes.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the input is empty or malformed.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DistinguishedNameError> {
        let input = input.as_ref().trim();
        if input.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let rdns = scan(input)?;
        Ok(Self::from_rdns(rdns))
    }

    fn from_rdns(rdns: Vec<Vec<RelativeDistinguishedName>>) -> Self {
        let raw = rdns
            .iter()
            .map(|rdn| {
                rdn.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect::<Vec<_>>()
            .join(",");
        Self { raw, rdns }
    }

    /// Borrows the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Components from the leaf to the root.
    #[must_use]
    pub fn rdns(&self) -> &[Vec<RelativeDistinguishedName>] {
        &self.rdns
    }

    /// Iterates over every attribute/value pair in order.
    pub fn components(&self) -> impl Iterator<Item = &RelativeDistinguishedName> + '_ {
        self.rdns.iter().flatten()
    }

    /// The leaf component, which names the entry within its parent.
    #[must_use]
    pub fn rdn(&self) -> &[RelativeDistinguishedName] {
        &self.rdns[0]
    }

    /// The distinguished name of the containing entry, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.len() < 2 {
            return None;
        }
        Some(Self::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Value of the first component whose attribute matches, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.components()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// Returns true if some component matches both attribute and value, ignoring ASCII case.
    #[must_use]
    pub fn contains(&self, attribute: &str, value: &str) -> bool {
        self.components()
            .any(|rdn| rdn.matches_attribute(attribute) && rdn.value.eq_ignore_ascii_case(value))
    }

    /// Prefixes a new leaf component (building a child's name).
    #[must_use]
    pub fn with_prefix(self, rdn: RelativeDistinguishedName) -> Self {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(vec![rdn]);
        rdns.extend(self.rdns);
        Self::from_rdns(rdns)
    }

    /// Appends `suffix` below this name (e.g. an RDN joined to a base DN).
    #[must_use]
    pub fn join(self, suffix: &DistinguishedName) -> Self {
        let mut rdns = self.rdns;
        rdns.extend(suffix.rdns.iter().cloned());
        Self::from_rdns(rdns)
    }

    /// The name this entry has after a rename that swaps its leaf component for `rdn`.
    #[must_use]
    pub fn renamed(&self, rdn: RelativeDistinguishedName) -> Self {
        let mut rdns = self.rdns.clone();
        rdns[0] = vec![rdn];
        Self::from_rdns(rdns)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

// Single pass over the input: `,` closes a component, `+` closes a pair within one.
fn scan(input: &str) -> Result<Vec<Vec<RelativeDistinguishedName>>, DistinguishedNameError> {
    let mut rdns = Vec::new();
    let mut pairs = Vec::new();
    let mut attribute: Option<String> = None;
    let mut current = ValueBuffer::default();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match unescape_one(&mut chars)? {
                Escaped::Char(escaped) => current.push_escaped(escaped)?,
                Escaped::Byte(byte) => current.push_byte(byte),
            },
            '=' if attribute.is_none() => {
                let name = current.take()?;
                if name.is_empty() {
                    return Err(DistinguishedNameError::MissingAttribute(input.to_string()));
                }
                attribute = Some(name);
            }
            '+' | ',' => {
                pairs.push(finish_pair(input, attribute.take(), current.take()?)?);
                if ch == ',' {
                    rdns.push(std::mem::take(&mut pairs));
                }
            }
            _ => current.push(ch)?,
        }
    }

    pairs.push(finish_pair(input, attribute, current.take()?)?);
    rdns.push(pairs);
    Ok(rdns)
}

/// Text of the component being scanned.
///
/// Unescaped whitespace around a value is dropped; escaped characters never are. Hex escapes are
/// gathered as raw bytes so a multi-byte UTF-8 sequence decodes as one character.
#[derive(Default)]
struct ValueBuffer {
    text: String,
    bytes: Vec<u8>,
    // End of the last escaped character; trimming stops here.
    protected: usize,
}

impl ValueBuffer {
    fn push(&mut self, ch: char) -> Result<(), DistinguishedNameError> {
        self.flush()?;
        if !(self.text.is_empty() && ch.is_whitespace()) {
            self.text.push(ch);
        }
        Ok(())
    }

    fn push_escaped(&mut self, ch: char) -> Result<(), DistinguishedNameError> {
        self.flush()?;
        self.text.push(ch);
        self.protected = self.text.len();
        Ok(())
    }

    fn push_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    fn flush(&mut self) -> Result<(), DistinguishedNameError> {
        if self.bytes.is_empty() {
            return Ok(());
        }
        let decoded = String::from_utf8(std::mem::take(&mut self.bytes))
            .map_err(|_| DistinguishedNameError::InvalidEscape)?;
        self.text.push_str(&decoded);
        self.protected = self.text.len();
        Ok(())
    }

    fn take(&mut self) -> Result<String, DistinguishedNameError> {
        self.flush()?;
        let keep = self.text.trim_end().len().max(self.protected);
        self.text.truncate(keep);
        self.protected = 0;
        Ok(std::mem::take(&mut self.text))
    }
}

fn finish_pair(
    input: &str,
    attribute: Option<String>,
    value: String,
) -> Result<RelativeDistinguishedName, DistinguishedNameError> {
    let attribute =
        attribute.ok_or_else(|| DistinguishedNameError::InvalidComponent(input.to_string()))?;
    if value.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute));
    }
    Ok(RelativeDistinguishedName::new(attribute, value))
}

enum Escaped {
    Char(char),
    Byte(u8),
}

fn unescape_one(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<Escaped, DistinguishedNameError> {
    let first = chars.next().ok_or(DistinguishedNameError::InvalidEscape)?;
    let Some(high) = first.to_digit(16) else {
        return Ok(Escaped::Char(first));
    };

    match chars.peek().and_then(|second| second.to_digit(16)) {
        Some(low) => {
            chars.next();
            let byte = u8::try_from(high * 16 + low)
                .map_err(|_| DistinguishedNameError::InvalidEscape)?;
            Ok(Escaped::Byte(byte))
        }
        None => Ok(Escaped::Char(first)),
    }
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());

    for (index, ch) in value.chars().enumerate() {
        let special = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (index == 0 && matches!(ch, ' ' | '#'))
            || (index == last && ch == ' ');
        if special {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_dn() {
        let dn = DistinguishedName::parse("cn=alice,ou=People,dc=example,dc=com").unwrap();
        assert_eq!(dn.get("CN"), Some("alice"));
        assert_eq!(dn.get("ou"), Some("People"));
        assert!(dn.contains("dc", "EXAMPLE"));
        assert_eq!(dn.to_string(), "cn=alice,ou=People,dc=example,dc=com");
    }

    #[test]
    fn parse_normalizes_whitespace() {
        let dn = DistinguishedName::parse(" cn = alice , dc=example ").unwrap();
        assert_eq!(dn.as_str(), "cn=alice,dc=example");
    }

    #[test]
    fn parse_escapes() {
        let dn = DistinguishedName::parse(r"cn=Smith\, John,dc=example,dc=com").unwrap();
        assert_eq!(dn.get("cn"), Some("Smith, John"));

        let hex = DistinguishedName::parse(r"cn=Smith\2C John,dc=example,dc=com").unwrap();
        assert_eq!(hex, dn);
        assert_eq!(hex.as_str(), r"cn=Smith\, John,dc=example,dc=com");
    }

    #[test]
    fn escaped_trailing_space_is_kept() {
        let dn = DistinguishedName::parse(r"cn=foo\ ,dc=example,dc=com").unwrap();
        assert_eq!(dn.get("cn"), Some("foo "));
        assert_eq!(dn.as_str(), r"cn=foo\ ,dc=example,dc=com");
        assert_eq!(DistinguishedName::parse(dn.as_str()).unwrap(), dn);

        let leading = DistinguishedName::parse(r"cn= \ foo ,dc=com").unwrap();
        assert_eq!(leading.get("cn"), Some(" foo"));
    }

    #[test]
    fn hex_escapes_decode_as_utf8() {
        let dn = DistinguishedName::parse(r"cn=Jos\C3\A9,dc=example,dc=com").unwrap();
        assert_eq!(dn.get("cn"), Some("José"));
        assert_eq!(dn.as_str(), "cn=José,dc=example,dc=com");

        assert_eq!(
            DistinguishedName::parse(r"cn=Jos\C3,dc=com").unwrap_err(),
            DistinguishedNameError::InvalidEscape
        );
    }

    #[test]
    fn parse_multi_valued_rdn() {
        let dn = DistinguishedName::parse("cn=alice+uid=42,dc=example,dc=com").unwrap();
        assert_eq!(dn.rdn().len(), 2);
        assert!(dn.contains("uid", "42"));
        assert_eq!(dn.to_string(), "cn=alice+uid=42,dc=example,dc=com");
    }

    #[test]
    fn invalid_inputs() {
        assert_eq!(
            DistinguishedName::parse("  ").unwrap_err(),
            DistinguishedNameError::Empty
        );
        assert!(matches!(
            DistinguishedName::parse("cn=alice,").unwrap_err(),
            DistinguishedNameError::InvalidComponent(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("=alice").unwrap_err(),
            DistinguishedNameError::MissingAttribute(_)
        ));
        assert!(matches!(
            DistinguishedName::parse("cn=,dc=com").unwrap_err(),
            DistinguishedNameError::MissingValue(_)
        ));
        assert_eq!(
            DistinguishedName::parse(r"cn=alice\").unwrap_err(),
            DistinguishedNameError::InvalidEscape
        );
    }

    #[test]
    fn parse_error_maps_to_invalid_argument() {
        let err: CoreError = DistinguishedName::parse("").unwrap_err().into();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn parent_prefix_and_join() {
        let base = DistinguishedName::parse("ou=People,dc=example,dc=com").unwrap();
        let alice = base
            .clone()
            .with_prefix(RelativeDistinguishedName::new("cn", "alice"));
        assert_eq!(alice.as_str(), "cn=alice,ou=People,dc=example,dc=com");
        assert_eq!(alice.parent(), Some(base.clone()));

        let joined = DistinguishedName::parse("uid=42").unwrap().join(&base);
        assert_eq!(joined.as_str(), "uid=42,ou=People,dc=example,dc=com");

        assert_eq!(DistinguishedName::parse("dc=com").unwrap().parent(), None);
    }

    #[test]
    fn renamed_swaps_leaf() {
        let dn = DistinguishedName::parse("cn=alice,dc=example,dc=com").unwrap();
        let rdn = RelativeDistinguishedName::parse("cn=alice smith").unwrap();
        assert_eq!(
            dn.renamed(rdn).as_str(),
            "cn=alice smith,dc=example,dc=com"
        );
        assert!(RelativeDistinguishedName::parse("cn=a,dc=b").is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let dn = DistinguishedName::parse("cn=alice,dc=example").unwrap();
        let json = serde_json::to_string(&dn).unwrap();
        assert_eq!(json, r#""cn=alice,dc=example""#);
        let back: DistinguishedName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dn);
    }
}
