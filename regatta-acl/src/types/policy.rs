use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{serde_hash, ContentHasher};

/// Name of the policy granted to callers presenting no credential.
///
/// The name is reserved: the synthetic anonymous token references it, and
/// operators create (or omit) it to shape what unauthenticated callers may
/// do.
pub const ANONYMOUS_POLICY_NAME: &str = "anonymous";

pub(crate) const MAX_POLICY_NAME_LENGTH: usize = 128;

/// A named set of rules, authored as a TOML document (see [`crate::rules`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    pub name: SmolStr,
    #[serde(default)]
    pub description: String,
    /// Raw rule document. Opaque here; parsed by [`crate::rules`] at upsert
    /// and compile time.
    pub rules: String,
    /// Scopes this policy to matching workload identities instead of (in
    /// addition to) token references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_grant: Option<JobGrant>,
    #[serde(default, with = "serde_hash")]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Policy {
    pub fn new(name: impl Into<SmolStr>, rules: impl Into<String>) -> Self {
        let mut policy = Policy {
            name: name.into(),
            description: String::new(),
            rules: rules.into(),
            job_grant: None,
            hash: Vec::new(),
            create_index: 0,
            modify_index: 0,
        };
        policy.set_hash();
        policy
    }

    pub fn compute_hash(&self) -> Vec<u8> {
        let mut hasher = ContentHasher::new()
            .field(&self.name)
            .field(&self.description)
            .field(&self.rules);
        if let Some(grant) = &self.job_grant {
            hasher = hasher
                .field(&grant.namespace)
                .field(&grant.job_id)
                .field(&grant.group)
                .field(&grant.task);
        }
        hasher.finish()
    }

    pub fn set_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Structural validity of the name itself; existence and rule parsing are
    /// checked by the write path.
    pub fn valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_POLICY_NAME_LENGTH
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

/// Scopes a policy to workload identities of one job.
///
/// Empty `group` and `task` act as wildcards; a non-empty `task` requires a
/// non-empty `group` to be meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobGrant {
    #[serde(default = "JobGrant::default_namespace")]
    pub namespace: SmolStr,
    #[serde(rename = "JobID")]
    pub job_id: SmolStr,
    #[serde(default)]
    pub group: SmolStr,
    #[serde(default)]
    pub task: SmolStr,
}

impl JobGrant {
    fn default_namespace() -> SmolStr {
        SmolStr::new_static("default")
    }
}
