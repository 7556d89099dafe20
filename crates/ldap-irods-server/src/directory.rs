//! Virtual directory
//!
//! There is no entry store. Every search is answered from the identities
//! currently held in the credential cache, plus the user a filter asks for
//! by `uid`.

use ldap_irods_auth::CredentialCache;
use ldap_irods_core::{Config, DistinguishedName, Filter, PEOPLE_OU, UID_ATTRIBUTE};
use std::collections::HashSet;
use std::sync::Arc;

/// A synthesized search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<(String, String)>,
}

impl Entry {
    pub fn get(&self, attr: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attr)
            .map(|(_, value)| value.as_str())
    }
}

pub struct VirtualDirectory {
    cache: Arc<CredentialCache>,
    base_dn: String,
    mail_domain: String,
}

impl VirtualDirectory {
    pub fn new(
        cache: Arc<CredentialCache>,
        base_dn: impl Into<String>,
        mail_domain: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            base_dn: base_dn.into(),
            mail_domain: mail_domain.into(),
        }
    }

    pub fn from_config(config: &Config, cache: Arc<CredentialCache>) -> Self {
        Self::new(cache, &config.ldap_base_dn, &config.mail_domain)
    }

    pub fn search(&self, base_object: &str, filter: &Filter, requested: &[String]) -> Vec<Entry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for identity in self.cache.identities() {
            let dn = format!("{}={},ou={},{}", UID_ATTRIBUTE, identity, PEOPLE_OU, self.base_dn);
            if !filter.matches(&DistinguishedName::parse(&dn)) {
                continue;
            }
            entries.push(Entry {
                dn,
                attributes: self.attributes(&identity, requested),
            });
            seen.insert(identity);
        }

        let asked = filter.extract_value(UID_ATTRIBUTE);
        if !asked.is_empty() && !seen.contains(asked) {
            entries.push(Entry {
                dn: format!("{}={},ou={},{}", UID_ATTRIBUTE, asked, PEOPLE_OU, base_object),
                attributes: self.attributes(asked, requested),
            });
        }

        entries
    }

    fn attributes(&self, identity: &str, requested: &[String]) -> Vec<(String, String)> {
        let mail = format!("{}@{}", identity, self.mail_domain);
        if requested.is_empty() {
            return vec![
                ("mail".to_string(), mail),
                ("cn".to_string(), identity.to_string()),
            ];
        }

        let wants = |name: &str| {
            requested
                .iter()
                .any(|r| r == "*" || r.eq_ignore_ascii_case(name))
        };

        [("uid", identity.to_string()), ("cn", identity.to_string()), ("mail", mail)]
            .into_iter()
            .filter(|(name, _)| wants(name))
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}
