//! RPC handler layer for the `ACL` namespace.
//!
//! One module per entity family, all methods on [`AclEndpoint`]. Every
//! handler follows the same discipline: resolve the caller's capability,
//! enforce the operation's requirement, validate, then read through the
//! blocking engine or commit through the replicated log.

pub mod message;

mod auth_methods;
mod binding_rules;
mod blocking;
mod login;
mod ott;
mod policies;
mod roles;
mod tokens;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use smol_str::SmolStr;
use time::OffsetDateTime;
use typed_builder::TypedBuilder;

use crate::capability::Capability;
use crate::claims;
use crate::compiler::CapabilityCache;
use crate::config::ConfHandle;
use crate::error::AclError;
use crate::fsm::{Applied, LogEntry, RaftHandle};
use crate::oidc::{NoOidcProvider, OidcProvider, PendingAuthSessions};
use crate::resolver::{self, TokenResolver};
use crate::selector::{EvalMode, Expression};
use crate::state::{Snapshot, StateStore};
use crate::types::{IdentityClaims, Token};

pub use message::*;

/// The ACL endpoint: every `ACL.*` RPC is a method on this type.
#[derive(Clone, TypedBuilder)]
pub struct AclEndpoint {
    conf: ConfHandle,
    store: Arc<StateStore>,
    raft: Arc<dyn RaftHandle>,
    resolver: TokenResolver,
    #[builder(default = Arc::new(NoOidcProvider))]
    oidc: Arc<dyn OidcProvider>,
    #[builder(default = Arc::new(PendingAuthSessions::new()))]
    sessions: Arc<PendingAuthSessions>,
}

impl AclEndpoint {
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn resolver(&self) -> &TokenResolver {
        &self.resolver
    }

    pub(crate) fn conf_handle(&self) -> &ConfHandle {
        &self.conf
    }

    pub(crate) fn oidc_provider(&self) -> &Arc<dyn OidcProvider> {
        &self.oidc
    }

    pub(crate) fn sessions(&self) -> &Arc<PendingAuthSessions> {
        &self.sessions
    }

    fn cache(&self) -> &Arc<CapabilityCache> {
        self.resolver.cache()
    }

    pub(crate) fn acl_enabled(&self) -> bool {
        self.conf.get_conf().acl.enabled
    }

    /// Resolves the caller's capability object. With ACLs disabled this is
    /// the all-permit sentinel and every later check passes.
    pub(crate) fn authenticate(&self, secret: &str) -> Result<Capability, AclError> {
        self.resolver.resolve(secret).map_err(Into::into)
    }

    pub(crate) fn require_management(&self, secret: &str) -> Result<Capability, AclError> {
        let capability = self.authenticate(secret)?;
        if !capability.is_management() {
            return Err(AclError::PermissionDenied);
        }
        Ok(capability)
    }

    /// The caller's token record; the anonymous token when no secret is
    /// presented.
    pub(crate) fn caller_token(&self, snapshot: &Snapshot, secret: &str) -> Result<Arc<Token>, AclError> {
        if secret.is_empty() {
            return Ok(Arc::new(Token::anonymous()));
        }
        resolver::token_for_secret(snapshot, secret, OffsetDateTime::now_utc()).map_err(Into::into)
    }

    pub(crate) async fn submit(&self, entry: LogEntry) -> Result<Applied, AclError> {
        self.raft.apply(entry).await
    }

    /// Verifies a workload identity JWT and resolves its job-scoped
    /// capability object. Used by scheduler-side handlers authorizing
    /// workload callers.
    pub fn verify_identity_claims(&self, token: &str) -> Result<(IdentityClaims, Capability), AclError> {
        let snapshot = self.store.snapshot();
        let conf = self.conf.get_conf();
        let (identity, allocation) =
            claims::verify_identity(&snapshot, &conf.identity_pub_keys, token, OffsetDateTime::now_utc())?;
        let capability = if conf.acl.enabled {
            claims::resolve_claims(self.cache(), &snapshot, &identity, &allocation)
        } else {
            Capability::Disabled
        };
        Ok((identity, capability))
    }
}

/// Every policy name a token speaks for: its direct references plus the
/// references of each linked role, existing or not.
pub(crate) fn effective_policy_names(snapshot: &Snapshot, token: &Token) -> BTreeSet<SmolStr> {
    let mut names: BTreeSet<SmolStr> = token.policies.iter().cloned().collect();
    for link in &token.roles {
        if let Some(role) = snapshot.role(&link.id) {
            names.extend(role.policy_names().cloned());
        }
    }
    names
}

/// Applies a list filter to an already-paged result set. Parse failures and
/// unknown field references surface with the documented substrings.
pub(crate) fn apply_filter<T: Serialize>(filter: Option<&str>, items: Vec<T>) -> Result<Vec<T>, AclError> {
    let Some(filter) = filter else {
        return Ok(items);
    };
    let expression = Expression::parse(filter)
        .map_err(|error| AclError::validation(format!("failed to read filter expression: {error}")))?;

    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let datum = serde_json::to_value(&item)
            .map_err(|error| AclError::Internal(anyhow::anyhow!("failed to serialize record for filtering: {error}")))?;
        match expression.evaluate(&datum, EvalMode::Filter) {
            Ok(true) => kept.push(item),
            Ok(false) => {}
            Err(error) => return Err(AclError::validation(error.to_string())),
        }
    }
    Ok(kept)
}
