//! Search filter micro-language
//!
//! Only the subset LDAP clients of this service actually send is
//! understood: a single equality term, or one `&`/`|` level of equality
//! terms. Anything else degrades to "no constraint" instead of failing,
//! because clients send partial filters.

use crate::dn::{matches_base, DistinguishedName};

/// Parsed search filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Equality { attr: String, value: String },
    /// Matches every entry
    Any,
}

impl Filter {
    /// Parse a filter string such as `(&(objectclass=*)(uid=alice))`.
    ///
    /// Never fails: empty or malformed input yields [`Filter::Any`].
    pub fn parse(filter: &str) -> Self {
        let text = strip_parens(filter.trim());

        if let Some(rest) = text.strip_prefix('&') {
            Filter::And(parse_terms(rest))
        } else if let Some(rest) = text.strip_prefix('|') {
            Filter::Or(parse_terms(rest))
        } else {
            parse_leaf(text)
        }
    }

    /// Value of the first equality term on `key`, or an empty string
    pub fn extract_value(&self, key: &str) -> &str {
        self.find_value(key).unwrap_or("")
    }

    fn find_value(&self, key: &str) -> Option<&str> {
        match self {
            Filter::And(terms) | Filter::Or(terms) => {
                terms.iter().find_map(|t| t.find_value(key))
            }
            Filter::Equality { attr, value } if attr == key => Some(value.as_str()),
            Filter::Equality { .. } | Filter::Any => None,
        }
    }

    pub fn matches(&self, candidate: &DistinguishedName) -> bool {
        match self {
            Filter::And(terms) => terms.iter().all(|t| t.matches(candidate)),
            Filter::Or(terms) => terms.iter().any(|t| t.matches(candidate)),
            Filter::Any => true,
            Filter::Equality { attr, value } => {
                let base = DistinguishedName::from_components([(attr.as_str(), value.as_str())]);
                matches_base(&base, candidate)
            }
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Any
    }
}

fn strip_parens(text: &str) -> &str {
    let text = text.strip_prefix('(').unwrap_or(text);
    text.strip_suffix(')').unwrap_or(text)
}

fn parse_terms(text: &str) -> Vec<Filter> {
    text.split(")(")
        .map(|term| term.trim_matches(|c| c == '(' || c == ')').trim())
        .filter(|term| !term.is_empty())
        .map(parse_leaf)
        .collect()
}

fn parse_leaf(text: &str) -> Filter {
    match text.split_once('=') {
        Some((attr, value)) => {
            let attr = attr.trim();
            let value = value.trim();
            if attr.is_empty() || (attr.eq_ignore_ascii_case("objectclass") && value == "*") {
                Filter::Any
            } else {
                Filter::Equality {
                    attr: attr.to_string(),
                    value: value.to_string(),
                }
            }
        }
        None => Filter::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(attr: &str, value: &str) -> Filter {
        Filter::Equality {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_parse_single_term() {
        assert_eq!(Filter::parse("(uid=alice)"), eq("uid", "alice"));
        assert_eq!(Filter::parse("uid=alice"), eq("uid", "alice"));
    }

    #[test]
    fn test_parse_conjunction() {
        assert_eq!(
            Filter::parse("(&(objectclass=*)(uid=alice))"),
            Filter::And(vec![Filter::Any, eq("uid", "alice")])
        );
        assert_eq!(
            Filter::parse("(|(uid=alice)(uid=bob))"),
            Filter::Or(vec![eq("uid", "alice"), eq("uid", "bob")])
        );
    }

    #[test]
    fn test_objectclass_wildcard() {
        assert_eq!(Filter::parse("(objectclass=*)"), Filter::Any);
        assert_eq!(Filter::parse("(objectClass=*)"), Filter::Any);
        assert_eq!(
            Filter::parse("(objectClass=person)"),
            eq("objectClass", "person")
        );
    }

    #[test]
    fn test_malformed_filters_degrade_to_any() {
        assert_eq!(Filter::parse(""), Filter::Any);
        assert_eq!(Filter::parse("()"), Filter::Any);
        assert_eq!(Filter::parse("(uid"), Filter::Any);
        assert_eq!(Filter::parse("(=alice)"), Filter::Any);
        assert_eq!(Filter::parse("uid=alice)"), eq("uid", "alice"));
        assert_eq!(Filter::parse("(&"), Filter::And(vec![]));
    }

    #[test]
    fn test_extract_value() {
        let filter = Filter::parse("(&(objectclass=*)(uid=carol)(cn=Carol))");
        assert_eq!(filter.extract_value("uid"), "carol");
        assert_eq!(filter.extract_value("cn"), "Carol");
        assert_eq!(filter.extract_value("mail"), "");
        assert_eq!(Filter::Any.extract_value("uid"), "");
    }

    #[test]
    fn test_extract_value_returns_first_match() {
        let filter = Filter::parse("(|(uid=alice)(uid=bob))");
        assert_eq!(filter.extract_value("uid"), "alice");
    }

    #[test]
    fn test_matches_conjunction_scenario() {
        let filter = Filter::parse("(&(objectclass=*)(uid=alice))");
        let alice = DistinguishedName::parse("uid=alice,ou=People,dc=example,dc=org");
        let bob = DistinguishedName::parse("uid=bob,ou=People,dc=example,dc=org");

        assert!(filter.matches(&alice));
        assert!(!filter.matches(&bob));
    }

    #[test]
    fn test_matches_disjunction() {
        let filter = Filter::parse("(|(uid=alice)(uid=bob))");
        assert!(filter.matches(&DistinguishedName::parse("uid=bob,dc=org")));
        assert!(!filter.matches(&DistinguishedName::parse("uid=carol,dc=org")));
        assert!(!Filter::Or(vec![]).matches(&DistinguishedName::parse("uid=bob")));
        assert!(Filter::And(vec![]).matches(&DistinguishedName::parse("uid=bob")));
    }

    #[test]
    fn test_wildcard_matches_everything() {
        assert!(Filter::parse("(objectclass=*)").matches(&DistinguishedName::default()));
        assert!(Filter::parse("garbage").matches(&DistinguishedName::parse("uid=x")));
    }

    #[test]
    fn test_equality_on_attribute_outside_dn() {
        let filter = Filter::parse("(mail=alice@example.org)");
        assert!(!filter.matches(&DistinguishedName::parse("uid=alice,dc=org")));
    }
}
