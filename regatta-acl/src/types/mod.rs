//! Persisted ACL entities and their invariants.
//!
//! Everything in this module is owned by the replicated log: mutations enter
//! through [`crate::fsm::LogEntry`] and readers only ever observe immutable
//! snapshots. Wire field names follow the cluster RPC convention
//! (PascalCase).

mod auth_method;
mod binding_rule;
mod ott;
mod policy;
mod role;
mod token;
mod workload;

pub use auth_method::{AuthMethod, AuthMethodConfig, AuthMethodType, TokenLocality};
pub use binding_rule::{BindType, BindingRule};
pub use ott::OneTimeToken;
pub use policy::{JobGrant, Policy, ANONYMOUS_POLICY_NAME};
pub use role::{PolicyLink, Role};
pub use token::{RoleLink, Token, TokenType, BOOTSTRAP_TOKEN_NAME};
pub use workload::{AllocClientStatus, Allocation, IdentityClaims, Node};

use sha2::{Digest as _, Sha256};

/// Serde adapter rendering content hashes as lowercase hex on the wire.
pub(crate) mod serde_hash {
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// Canonical content hashing used by every entity carrying a `Hash` field.
///
/// Fields are folded in a fixed order with a NUL separator so that two
/// entities hash equal exactly when their authored content is equal (indexes
/// and server-assigned timestamps are excluded).
pub(crate) struct ContentHasher(Sha256);

impl ContentHasher {
    pub(crate) fn new() -> Self {
        ContentHasher(Sha256::new())
    }

    pub(crate) fn field(mut self, value: &str) -> Self {
        self.0.update(value.as_bytes());
        self.0.update([0]);
        self
    }

    pub(crate) fn flag(self, value: bool) -> Self {
        self.field(if value { "1" } else { "0" })
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}
