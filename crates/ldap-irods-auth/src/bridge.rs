//! Authentication bridge
//!
//! Validates a presented bind name, consults the credential cache and falls
//! back to remote authentication (plus the optional group gate). Only a
//! complete remote success writes the cache.

use crate::cache::CredentialCache;
use crate::irods::{IrodsAuthenticator, IrodsConfig};
use crate::remote::{RemoteAuthenticator, RemoteSession};
use ldap_irods_core::{matches_base, Config, DistinguishedName, Error, Result};
use ldap_irods_crypto::auth_token;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info};

pub mod names {
    pub const AUTH_CACHE_HITS_TOTAL: &str = "ldap_irods_auth_cache_hits_total";
    pub const AUTH_CACHE_MISSES_TOTAL: &str = "ldap_irods_auth_cache_misses_total";
    pub const AUTH_REMOTE_ATTEMPTS_TOTAL: &str = "ldap_irods_auth_remote_attempts_total";
}

/// How a presented bind name becomes the identity checked remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMapping {
    /// The name is a DN under `base`; the identity is its `uid` value
    Dn { base: DistinguishedName },
    /// The name is the identity
    Raw,
}

impl NameMapping {
    pub fn resolve(&self, presented: &str) -> Result<String> {
        let identity = match self {
            NameMapping::Dn { base } => {
                let dn = DistinguishedName::parse(presented);
                if !matches_base(base, &dn) {
                    return Err(Error::DnOutsideBase(presented.to_string()));
                }
                dn.username().to_string()
            }
            NameMapping::Raw => presented.to_string(),
        };

        if identity.is_empty() {
            return Err(Error::MissingUsername);
        }
        Ok(identity)
    }
}

/// Outcome of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: String,
    /// Answered from the cache without a remote call
    pub cached: bool,
}

pub struct AuthBridge {
    remote: Arc<dyn RemoteAuthenticator>,
    cache: Arc<CredentialCache>,
    secret: String,
    mapping: NameMapping,
    required_group: Option<String>,
}

impl AuthBridge {
    pub fn new(
        remote: Arc<dyn RemoteAuthenticator>,
        cache: Arc<CredentialCache>,
        secret: impl Into<String>,
        mapping: NameMapping,
        required_group: Option<String>,
    ) -> Self {
        Self {
            remote,
            cache,
            secret: secret.into(),
            mapping,
            required_group,
        }
    }

    /// Bridge against the configured iRODS zone, accepting DNs under the
    /// configured base DN
    pub fn from_config(config: &Config, cache: Arc<CredentialCache>) -> Self {
        let remote = Arc::new(IrodsAuthenticator::new(IrodsConfig::from_config(config)));
        Self::new(
            remote,
            cache,
            config.hash_secret(),
            NameMapping::Dn {
                base: DistinguishedName::parse(&config.ldap_base_dn),
            },
            config.required_group().map(str::to_string),
        )
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    pub fn mapping(&self) -> &NameMapping {
        &self.mapping
    }

    pub async fn authenticate(&self, presented: &str, credential: &str) -> Result<Authenticated> {
        let identity = self.mapping.resolve(presented)?;
        let token = auth_token(&self.secret, &identity, credential);

        if self.cache.lookup(&identity).as_deref() == Some(token.as_str()) {
            counter!(names::AUTH_CACHE_HITS_TOTAL).increment(1);
            debug!(user = %identity, "Authenticated from cache");
            return Ok(Authenticated {
                identity,
                cached: true,
            });
        }
        counter!(names::AUTH_CACHE_MISSES_TOTAL).increment(1);

        debug!(user = %identity, "Authenticating against iRODS");
        let session = self.remote.connect(&identity, credential).await;
        let outcome = match &session {
            Ok(_) => "connected",
            Err(e) if e.kind() == ldap_irods_core::ErrorKind::RemoteConnectivity => "unreachable",
            Err(_) => "rejected",
        };
        counter!(names::AUTH_REMOTE_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
        let mut session = session?;

        let gate = self.check_group(&identity, session.as_mut()).await;
        session.disconnect().await;
        gate?;

        self.cache.put(&identity, token);
        info!(user = %identity, "Authenticated against iRODS");

        Ok(Authenticated {
            identity,
            cached: false,
        })
    }

    async fn check_group(&self, identity: &str, session: &mut dyn RemoteSession) -> Result<()> {
        let Some(group) = self.required_group.as_deref() else {
            return Ok(());
        };

        let groups = session.list_user_groups(identity).await?;
        if groups.iter().any(|g| g == group) {
            return Ok(());
        }

        Err(Error::NotInGroup {
            user: identity.to_string(),
            group: group.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::tests::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Remote that accepts one password per user and counts every call
    #[derive(Default)]
    pub(crate) struct FakeRemote {
        pub users: Vec<(&'static str, &'static str, Vec<&'static str>)>,
        pub unreachable: bool,
        pub connects: AtomicUsize,
        pub disconnects: Arc<AtomicUsize>,
    }

    struct FakeSession {
        groups: Vec<String>,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteSession for FakeSession {
        async fn list_user_groups(&mut self, _username: &str) -> Result<Vec<String>> {
            Ok(self.groups.clone())
        }

        async fn disconnect(self: Box<Self>) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RemoteAuthenticator for FakeRemote {
        async fn connect(&self, username: &str, password: &str) -> Result<Box<dyn RemoteSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(Error::RemoteConnectivity("connection refused".into()));
            }
            let user = self
                .users
                .iter()
                .find(|(u, p, _)| *u == username && *p == password)
                .ok_or_else(|| Error::InvalidCredentials(username.to_string()))?;

            Ok(Box::new(FakeSession {
                groups: user.2.iter().map(|g| g.to_string()).collect(),
                disconnects: self.disconnects.clone(),
            }))
        }
    }

    const BASE: &str = "dc=example,dc=org";

    fn bridge(remote: Arc<FakeRemote>, group: Option<&str>) -> (AuthBridge, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let cache = Arc::new(CredentialCache::with_clock(
            Duration::from_secs(300),
            clock.clone(),
        ));
        let bridge = AuthBridge::new(
            remote,
            cache,
            "seed",
            NameMapping::Dn {
                base: DistinguishedName::parse(BASE),
            },
            group.map(str::to_string),
        );
        (bridge, clock)
    }

    fn alice_remote() -> Arc<FakeRemote> {
        Arc::new(FakeRemote {
            users: vec![("alice", "secret", vec!["alice", "staff"])],
            ..Default::default()
        })
    }

    #[test]
    fn test_name_mapping() {
        let dn = NameMapping::Dn {
            base: DistinguishedName::parse(BASE),
        };
        assert_eq!(
            dn.resolve("uid=alice,ou=People,dc=example,dc=org").unwrap(),
            "alice"
        );
        assert!(matches!(
            dn.resolve("uid=alice,dc=example,dc=com"),
            Err(Error::DnOutsideBase(_))
        ));
        assert!(matches!(
            dn.resolve("cn=admin,dc=example,dc=org"),
            Err(Error::MissingUsername)
        ));

        assert_eq!(NameMapping::Raw.resolve("alice").unwrap(), "alice");
        assert!(matches!(NameMapping::Raw.resolve(""), Err(Error::MissingUsername)));
    }

    #[tokio::test]
    async fn test_second_bind_is_served_from_cache() {
        let remote = alice_remote();
        let (bridge, _) = bridge(remote.clone(), None);
        let dn = "uid=alice,ou=People,dc=example,dc=org";

        let first = bridge.authenticate(dn, "secret").await.unwrap();
        assert!(!first.cached);
        let second = bridge.authenticate(dn, "secret").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.identity, "alice");

        assert_eq!(remote.connects.load(Ordering::SeqCst), 1);
        assert_eq!(remote.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_goes_remote_again() {
        let remote = alice_remote();
        let (bridge, clock) = bridge(remote.clone(), None);
        let dn = "uid=alice,ou=People,dc=example,dc=org";

        bridge.authenticate(dn, "secret").await.unwrap();
        clock.advance(Duration::from_secs(301));
        let again = bridge.authenticate(dn, "secret").await.unwrap();

        assert!(!again.cached);
        assert_eq!(remote.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wrong_password_is_not_cached() {
        let remote = alice_remote();
        let (bridge, _) = bridge(remote.clone(), None);
        let dn = "uid=alice,ou=People,dc=example,dc=org";

        let result = bridge.authenticate(dn, "wrong").await;
        assert!(matches!(result, Err(Error::InvalidCredentials(_))));
        assert!(bridge.cache().is_empty());

        // a cached success does not let a different password through
        bridge.authenticate(dn, "secret").await.unwrap();
        assert!(bridge.authenticate(dn, "wrong").await.is_err());
        assert_eq!(remote.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dn_outside_base_never_reaches_remote() {
        let remote = alice_remote();
        let (bridge, _) = bridge(remote.clone(), None);

        let result = bridge.authenticate("uid=alice,dc=example,dc=com", "secret").await;
        assert!(matches!(result, Err(Error::DnOutsideBase(_))));
        assert_eq!(remote.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_group_gate() {
        let remote = Arc::new(FakeRemote {
            users: vec![
                ("alice", "secret", vec!["alice", "staff"]),
                ("bob", "hunter2", vec!["bob"]),
            ],
            ..Default::default()
        });
        let (bridge, _) = bridge(remote.clone(), Some("staff"));

        bridge
            .authenticate("uid=alice,ou=People,dc=example,dc=org", "secret")
            .await
            .unwrap();

        let result = bridge
            .authenticate("uid=bob,ou=People,dc=example,dc=org", "hunter2")
            .await;
        assert!(matches!(result, Err(Error::NotInGroup { ref user, .. }) if user == "bob"));

        assert_eq!(bridge.cache().identities().len(), 1);
        // the session is released on both paths
        assert_eq!(remote.disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_remote() {
        let remote = Arc::new(FakeRemote {
            unreachable: true,
            ..Default::default()
        });
        let (bridge, _) = bridge(remote, None);

        let err = bridge
            .authenticate("uid=alice,ou=People,dc=example,dc=org", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteConnectivity(_)));
        assert!(err.is_auth_failure());
        assert!(bridge.cache().is_empty());
    }
}
