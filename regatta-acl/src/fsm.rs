//! Committed log entries and their application to the state store.
//!
//! The consensus layer is an external collaborator: entries submitted
//! through [`RaftHandle`] come back committed, ordered and exactly-once,
//! carrying the log index that becomes the mutated tables' index.
//! [`InlineRaft`] is the in-process stand-in used by tests and single-node
//! embeds; it serializes writes and assigns monotonically increasing
//! indexes, which is all the rest of the crate assumes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::AclError;
use crate::state::StateStore;
use crate::types::{AuthMethod, BindingRule, OneTimeToken, Policy, Role, Token};

/// One replicated mutation. Requests are fully validated and canonicalized
/// by the write path before submission; apply is therefore mechanical,
/// except for the bootstrap gate which must be checked at apply time to stay
/// linearizable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LogEntry {
    PolicyUpsert { policies: Vec<Policy> },
    PolicyDelete { names: Vec<SmolStr> },
    TokenUpsert { tokens: Vec<Token> },
    TokenDelete { accessors: Vec<SmolStr> },
    /// `reset_index` is the bootstrap watermark the submitter observed; a
    /// mismatch at apply time means another bootstrap won the race.
    TokenBootstrap { token: Token, reset_index: u64 },
    RoleUpsert { roles: Vec<Role> },
    RoleDelete { ids: Vec<SmolStr> },
    AuthMethodUpsert { methods: Vec<AuthMethod> },
    AuthMethodDelete { names: Vec<SmolStr> },
    BindingRuleUpsert { rules: Vec<BindingRule> },
    BindingRuleDelete { ids: Vec<SmolStr> },
    OneTimeTokenUpsert { ott: OneTimeToken },
    /// Compare-and-delete; the output reports whether the secret was live.
    OneTimeTokenDelete { secret: SmolStr },
    OneTimeTokenExpire {
        #[serde(with = "time::serde::rfc3339")]
        now: OffsetDateTime,
    },
}

/// Result of applying one committed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutput {
    None,
    OneTimeTokenDeleted { found: bool },
    OneTimeTokensExpired { count: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct Applied {
    pub index: u64,
    pub output: ApplyOutput,
}

/// Applies a committed entry at `index`. Infallible for every entry except
/// the bootstrap gate.
pub fn apply(store: &StateStore, index: u64, entry: LogEntry) -> Result<ApplyOutput, AclError> {
    match entry {
        LogEntry::PolicyUpsert { policies } => {
            store.upsert_policies(index, policies);
            Ok(ApplyOutput::None)
        }
        LogEntry::PolicyDelete { names } => {
            store.delete_policies(index, &names);
            Ok(ApplyOutput::None)
        }
        LogEntry::TokenUpsert { tokens } => {
            store.upsert_tokens(index, tokens);
            Ok(ApplyOutput::None)
        }
        LogEntry::TokenDelete { accessors } => {
            store.delete_tokens(index, &accessors);
            Ok(ApplyOutput::None)
        }
        LogEntry::TokenBootstrap { token, reset_index } => {
            let current = store.snapshot().bootstrap_index();
            if current != reset_index {
                return Err(AclError::validation(format!(
                    "ACL bootstrap already done (reset index: {current})"
                )));
            }
            store.set_bootstrap(index, token);
            Ok(ApplyOutput::None)
        }
        LogEntry::RoleUpsert { roles } => {
            store.upsert_roles(index, roles);
            Ok(ApplyOutput::None)
        }
        LogEntry::RoleDelete { ids } => {
            store.delete_roles(index, &ids);
            Ok(ApplyOutput::None)
        }
        LogEntry::AuthMethodUpsert { methods } => {
            store.upsert_auth_methods(index, methods);
            Ok(ApplyOutput::None)
        }
        LogEntry::AuthMethodDelete { names } => {
            store.delete_auth_methods(index, &names);
            Ok(ApplyOutput::None)
        }
        LogEntry::BindingRuleUpsert { rules } => {
            store.upsert_binding_rules(index, rules);
            Ok(ApplyOutput::None)
        }
        LogEntry::BindingRuleDelete { ids } => {
            store.delete_binding_rules(index, &ids);
            Ok(ApplyOutput::None)
        }
        LogEntry::OneTimeTokenUpsert { ott } => {
            store.upsert_one_time_token(index, ott);
            Ok(ApplyOutput::None)
        }
        LogEntry::OneTimeTokenDelete { secret } => {
            let found = store.delete_one_time_token(index, &secret);
            Ok(ApplyOutput::OneTimeTokenDeleted { found })
        }
        LogEntry::OneTimeTokenExpire { now } => {
            let count = store.expire_one_time_tokens(index, now);
            Ok(ApplyOutput::OneTimeTokensExpired { count })
        }
    }
}

/// Submission seam towards the consensus layer.
#[async_trait]
pub trait RaftHandle: Send + Sync {
    /// Submits `entry` and waits for commit. Returns the commit index,
    /// which the write path echoes to callers as the write index.
    async fn apply(&self, entry: LogEntry) -> Result<Applied, AclError>;
}

/// In-process log: writes serialize behind one mutex, indexes increase by
/// one per entry.
pub struct InlineRaft {
    store: Arc<StateStore>,
    next_index: Mutex<u64>,
}

impl InlineRaft {
    pub fn new(store: Arc<StateStore>) -> Self {
        let next_index = store.latest_index() + 1;
        InlineRaft {
            store,
            next_index: Mutex::new(next_index),
        }
    }

    /// Pins the index the next entry commits at. Test hook for scenarios
    /// that assert on concrete index values.
    pub async fn set_next_index(&self, index: u64) {
        *self.next_index.lock().await = index;
    }
}

#[async_trait]
impl RaftHandle for InlineRaft {
    async fn apply(&self, entry: LogEntry) -> Result<Applied, AclError> {
        let mut next_index = self.next_index.lock().await;
        let index = *next_index;
        // The index is consumed even when the FSM rejects the entry, exactly
        // as a committed-but-rejected entry would behave on a real log.
        *next_index += 1;
        let output = apply(&self.store, index, entry)?;
        Ok(Applied { index, output })
    }
}
