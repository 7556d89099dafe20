//! Distinguished names
//!
//! A deliberately small DN model: an ordered list of `attribute=value`
//! pairs. No escaping, no multi-valued RDNs. Attribute names are compared
//! exactly as given.

use std::fmt;

/// Parsed distinguished name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    components: Vec<(String, String)>,
}

impl DistinguishedName {
    /// Parse a comma separated list of `key=value` components.
    ///
    /// Each component is split on its first `=` and both sides are trimmed.
    /// Components without `=` are dropped.
    pub fn parse(dn: &str) -> Self {
        let components = dn
            .split(',')
            .filter_map(|field| field.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Self { components }
    }

    pub fn from_components<I, K, V>(components: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            components: components
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value bound to `attr`; the last occurrence wins.
    pub fn get(&self, attr: &str) -> Option<&str> {
        self.components
            .iter()
            .rev()
            .find(|(k, _)| k == attr)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `uid`, or an empty string
    pub fn username(&self) -> &str {
        self.get(crate::UID_ATTRIBUTE).unwrap_or("")
    }

    pub fn components(&self) -> &[(String, String)] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl From<&str> for DistinguishedName {
    fn from(dn: &str) -> Self {
        Self::parse(dn)
    }
}

/// True iff every attribute of `base` is present in `candidate` with an
/// identical value. Attributes only present in `candidate` are ignored.
pub fn matches_base(base: &DistinguishedName, candidate: &DistinguishedName) -> bool {
    base.components
        .iter()
        .all(|(k, _)| candidate.get(k).is_some() && candidate.get(k) == base.get(k))
}
