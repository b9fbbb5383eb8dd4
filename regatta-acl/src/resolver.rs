//! Presented secret → capability object.
//!
//! The resolution contract, in order:
//!
//! 1. ACLs disabled → the all-permit sentinel, no cache interaction.
//! 2. Secret equals the process-local leader secret → management.
//! 3. Otherwise against a state snapshot: empty secret resolves as the
//!    anonymous token, unknown secrets are *token-not-found*, stale ones
//!    *token-expired*, management tokens short-circuit, client tokens go
//!    through the policy compiler and its cache.
//!
//! Output is deterministic per (secret, snapshot); callers holding onto a
//! capability object tolerate staleness of at most one resolution round.

use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret as _, SecretString};
use time::OffsetDateTime;
use typed_builder::TypedBuilder;

use crate::capability::Capability;
use crate::compiler::{self, CapabilityCache};
use crate::config::ConfHandle;
use crate::error::ResolveError;
use crate::state::{Snapshot, StateStore};
use crate::types::Token;

/// Transient leader-only secret used to authenticate internal RPCs.
///
/// Installed at leadership acquisition and cleared (zeroed on drop, via the
/// secrecy wrapper) at step-down. Never persisted, never replicated.
#[derive(Clone, Default)]
pub struct LeaderSecret {
    inner: Arc<Mutex<Option<SecretString>>>,
}

impl LeaderSecret {
    pub fn new() -> Self {
        LeaderSecret::default()
    }

    pub fn install(&self, secret: String) {
        *self.inner.lock() = Some(SecretString::from(secret));
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    pub fn matches(&self, presented: &str) -> bool {
        match self.inner.lock().as_ref() {
            Some(secret) => !presented.is_empty() && secret.expose_secret() == presented,
            None => false,
        }
    }
}

#[derive(Clone, TypedBuilder)]
pub struct TokenResolver {
    conf: ConfHandle,
    store: Arc<StateStore>,
    cache: Arc<CapabilityCache>,
    #[builder(default)]
    leader_secret: LeaderSecret,
}

impl TokenResolver {
    pub fn leader_secret(&self) -> &LeaderSecret {
        &self.leader_secret
    }

    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Resolves against the current state.
    pub fn resolve(&self, secret: &str) -> Result<Capability, ResolveError> {
        if !self.conf.get_conf().acl.enabled {
            return Ok(Capability::Disabled);
        }
        if self.leader_secret.matches(secret) {
            return Ok(Capability::management());
        }
        let snapshot = self.store.snapshot();
        self.resolve_in(&snapshot, secret)
    }

    /// Resolves against a caller-supplied snapshot; deterministic for a
    /// given (secret, snapshot) pair. The disabled and leader-secret steps
    /// still apply.
    pub fn resolve_in(&self, snapshot: &Snapshot, secret: &str) -> Result<Capability, ResolveError> {
        if !self.conf.get_conf().acl.enabled {
            return Ok(Capability::Disabled);
        }
        if self.leader_secret.matches(secret) {
            return Ok(Capability::management());
        }
        self.resolve_at(snapshot, secret, OffsetDateTime::now_utc())
    }

    fn resolve_at(&self, snapshot: &Snapshot, secret: &str, now: OffsetDateTime) -> Result<Capability, ResolveError> {
        if secret.is_empty() {
            let anonymous = Token::anonymous();
            let policies = compiler::policies_for_token(snapshot, &anonymous);
            return Ok(compiler::compile(&self.cache, &policies));
        }

        let token = token_for_secret(snapshot, secret, now)?;
        Ok(compiler::resolve_token(&self.cache, snapshot, &token))
    }
}

/// Looks up and vets the token record for a presented secret. Shared by the
/// resolver and the endpoints that need the record itself (self-reads,
/// one-time token issue, `ResolveToken`).
pub fn token_for_secret(snapshot: &Snapshot, secret: &str, now: OffsetDateTime) -> Result<Arc<Token>, ResolveError> {
    let token = snapshot.token_by_secret(secret).ok_or(ResolveError::TokenNotFound)?;
    if token.is_expired(now) {
        return Err(ResolveError::TokenExpired);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use crate::config::{Conf, ConfHandle};
    use crate::rules::NamespaceCapability;
    use crate::types::{Policy, TokenType, ANONYMOUS_POLICY_NAME};

    use super::*;

    fn conf(enabled: bool) -> ConfHandle {
        let handle = ConfHandle::from_json(r#"{ "DataDir": "/tmp/regatta-test" }"#).expect("valid config");
        let mut conf: Conf = (*handle.get_conf()).clone();
        conf.acl.enabled = enabled;
        handle.set_conf(conf);
        handle
    }

    fn resolver(enabled: bool) -> (Arc<StateStore>, TokenResolver) {
        let store = Arc::new(StateStore::new());
        let resolver = TokenResolver::builder()
            .conf(conf(enabled))
            .store(Arc::clone(&store))
            .cache(Arc::new(CapabilityCache::default()))
            .build();
        (store, resolver)
    }

    #[test]
    fn disabled_acls_return_sentinel() {
        let (_store, resolver) = resolver(false);
        let capability = resolver.resolve("anything").expect("resolves");
        assert!(matches!(capability, Capability::Disabled));
    }

    #[test]
    fn leader_secret_resolves_to_management() {
        let (_store, resolver) = resolver(true);
        resolver.leader_secret().install("leader-secret".to_owned());

        let capability = resolver.resolve("leader-secret").expect("resolves");
        assert!(capability.is_management());

        resolver.leader_secret().clear();
        assert!(matches!(resolver.resolve("leader-secret"), Err(ResolveError::TokenNotFound)));
    }

    #[test]
    fn unknown_and_expired_secrets() {
        let (store, resolver) = resolver(true);
        assert!(matches!(resolver.resolve("nope"), Err(ResolveError::TokenNotFound)));

        let mut token = Token::new_client("t", Vec::new(), Vec::new());
        token.expiration_time = Some(OffsetDateTime::now_utc() - time::Duration::minutes(1));
        let secret = token.secret_id.clone();
        store.upsert_tokens(2, vec![token]);
        assert!(matches!(resolver.resolve(&secret), Err(ResolveError::TokenExpired)));
    }

    #[test]
    fn empty_secret_resolves_anonymous() {
        let (store, resolver) = resolver(true);

        // Without an anonymous policy: a deny-all client capability.
        let capability = resolver.resolve("").expect("resolves");
        assert!(!capability.is_management());
        assert!(!capability.allow_namespace_operation("default", NamespaceCapability::ListJobs));

        store.upsert_policies(
            2,
            vec![Policy::new(ANONYMOUS_POLICY_NAME, "[namespace.\"default\"]\npolicy = \"list\"\n")],
        );
        let capability = resolver.resolve("").expect("resolves");
        assert!(capability.allow_namespace_operation("default", NamespaceCapability::ListJobs));
    }

    #[test]
    fn management_tokens_short_circuit() {
        let (store, resolver) = resolver(true);
        let mut token = Token::new_client("mgmt", Vec::new(), Vec::new());
        token.token_type = TokenType::Management;
        let secret = token.secret_id.clone();
        store.upsert_tokens(2, vec![token]);

        let capability = resolver.resolve(&secret).expect("resolves");
        assert!(capability.is_management());
    }

    #[test]
    fn resolution_is_deterministic_per_snapshot() {
        let (store, resolver) = resolver(true);
        store.upsert_policies(2, vec![Policy::new("p", "[namespace.\"default\"]\npolicy = \"read\"\n")]);
        let token = Token::new_client("t", vec!["p".into()], Vec::new());
        let secret = token.secret_id.clone();
        store.upsert_tokens(3, vec![token]);

        let snapshot = store.snapshot();
        let first = resolver.resolve_in(&snapshot, &secret).expect("resolves");
        let second = resolver.resolve_in(&snapshot, &secret).expect("resolves");
        assert_eq!(first, second);
    }
}
