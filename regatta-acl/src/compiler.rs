//! Merges policy references into a compiled capability object.
//!
//! Three reference sources feed the compiler: a token's direct policy list,
//! the policies of its linked roles, and (for workload identity claims) the
//! job-grant scoped policies of the allocation's job. Missing references are
//! skipped silently everywhere: a dangling name confers nothing and must not
//! break the token it dangles from.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest as _, Sha256};
use smol_str::SmolStr;
use tracing::warn;

use crate::cache::TwoQueueCache;
use crate::capability::Capability;
use crate::rules::{parse_rules, RuleSet};
use crate::state::Snapshot;
use crate::types::{Allocation, Policy, Token};

pub const DEFAULT_CACHE_SIZE: usize = 512;

type PolicySetHash = [u8; 32];

/// Process-wide cache of compiled capability objects, keyed by the content
/// hash of the effective policy set. Two tokens resolving to the same
/// policies share one compiled object.
pub struct CapabilityCache {
    inner: Mutex<TwoQueueCache<PolicySetHash, Capability>>,
}

impl CapabilityCache {
    pub fn new(size: usize) -> Self {
        CapabilityCache {
            inner: Mutex::new(TwoQueueCache::new(size)),
        }
    }

    fn get(&self, key: &PolicySetHash) -> Option<Capability> {
        self.inner.lock().get(key)
    }

    fn put(&self, key: PolicySetHash, value: Capability) {
        self.inner.lock().put(key, value);
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        CapabilityCache::new(DEFAULT_CACHE_SIZE)
    }
}

/// The deduplicated policy set a client token resolves to, sorted by name.
pub fn policies_for_token(snapshot: &Snapshot, token: &Token) -> Vec<Arc<Policy>> {
    let mut merged: BTreeMap<SmolStr, Arc<Policy>> = BTreeMap::new();

    for name in &token.policies {
        if let Some(policy) = snapshot.policy(name) {
            merged.insert(policy.name.clone(), policy);
        }
    }

    for link in &token.roles {
        let Some(role) = snapshot.role(&link.id) else {
            continue;
        };
        for name in role.policy_names() {
            if let Some(policy) = snapshot.policy(name) {
                merged.insert(policy.name.clone(), policy);
            }
        }
    }

    merged.into_values().collect()
}

/// The policy set a verified workload identity resolves to: job-grant
/// policies of the allocation's job (falling back to the parent job for
/// dispatched and periodic children), filtered by group and task.
pub fn policies_for_claim(snapshot: &Snapshot, allocation: &Allocation, task: &str) -> Vec<Arc<Policy>> {
    let mut merged: BTreeMap<SmolStr, Arc<Policy>> = BTreeMap::new();

    let mut candidates = snapshot.policies_for_job(&allocation.namespace, &allocation.job_id);
    if let Some(parent) = &allocation.parent_job_id {
        candidates.extend(snapshot.policies_for_job(&allocation.namespace, parent));
    }

    for policy in candidates {
        let Some(grant) = &policy.job_grant else {
            continue;
        };
        if grant_applies(grant.group.as_str(), grant.task.as_str(), &allocation.task_group, task) {
            merged.insert(policy.name.clone(), policy);
        }
    }

    merged.into_values().collect()
}

fn grant_applies(grant_group: &str, grant_task: &str, group: &str, task: &str) -> bool {
    if grant_group.is_empty() {
        return true;
    }
    if grant_group != group {
        return false;
    }
    grant_task.is_empty() || grant_task == task
}

/// Compiles a sorted, deduplicated policy set, consulting the cache first.
pub fn compile(cache: &CapabilityCache, policies: &[Arc<Policy>]) -> Capability {
    let key = policy_set_hash(policies);
    if let Some(capability) = cache.get(&key) {
        return capability;
    }

    let rule_sets: Vec<RuleSet> = policies
        .iter()
        .filter_map(|policy| match parse_rules(&policy.rules) {
            Ok(rules) => Some(rules),
            Err(error) => {
                // Upsert validation should make this unreachable; a policy
                // that decays anyway loses its grants rather than the token.
                warn!(policy = %policy.name, %error, "stored ACL policy no longer parses, skipping");
                None
            }
        })
        .collect();

    let capability = Capability::compile(&rule_sets);
    cache.put(key, capability.clone());
    capability
}

/// Capability object for a token already looked up from state.
pub fn resolve_token(cache: &CapabilityCache, snapshot: &Snapshot, token: &Token) -> Capability {
    if token.is_management() {
        return Capability::management();
    }
    let policies = policies_for_token(snapshot, token);
    compile(cache, &policies)
}

/// Content hash of the effective policy list: per-policy name and rule hash,
/// in name order. A changed rule body changes the policy hash and therefore
/// misses the cache.
fn policy_set_hash(policies: &[Arc<Policy>]) -> PolicySetHash {
    let mut hasher = Sha256::new();
    for policy in policies {
        hasher.update(policy.name.as_bytes());
        hasher.update([0]);
        hasher.update(&policy.hash);
        hasher.update([0]);
    }
    hasher.finalize().into()
}
