use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use smol_str::SmolStr;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::types::{Allocation, AuthMethod, BindingRule, Node, OneTimeToken, Policy, Role, Token, BOOTSTRAP_TOKEN_NAME};

use super::{TableId, WatchSet};

type Map<V> = Arc<BTreeMap<SmolStr, Arc<V>>>;

/// Immutable image of every ACL table at one point in time.
///
/// Cloning is a handful of `Arc` bumps; holding a snapshot never blocks a
/// writer, and a snapshot never observes a half-applied mutation.
#[derive(Clone)]
pub struct Snapshot {
    policies: Map<Policy>,
    /// (namespace, job id, policy name): job-grant scoped policies.
    job_grants: Arc<BTreeMap<(SmolStr, SmolStr, SmolStr), ()>>,
    roles: Map<Role>,
    role_names: Arc<BTreeMap<SmolStr, SmolStr>>,
    tokens: Map<Token>,
    token_secrets: Arc<BTreeMap<SmolStr, SmolStr>>,
    /// Canonical (create index, accessor) listing order.
    token_order: Arc<BTreeMap<(u64, SmolStr), SmolStr>>,
    auth_methods: Map<AuthMethod>,
    binding_rules: Map<BindingRule>,
    one_time_tokens: Map<OneTimeToken>,
    allocations: Map<Allocation>,
    nodes: Map<Node>,
    indexes: [u64; TableId::COUNT],
    bootstrap_index: u64,
    latest_index: u64,
}

impl Snapshot {
    fn genesis() -> Self {
        Snapshot {
            policies: Arc::new(BTreeMap::new()),
            job_grants: Arc::new(BTreeMap::new()),
            roles: Arc::new(BTreeMap::new()),
            role_names: Arc::new(BTreeMap::new()),
            tokens: Arc::new(BTreeMap::new()),
            token_secrets: Arc::new(BTreeMap::new()),
            token_order: Arc::new(BTreeMap::new()),
            auth_methods: Arc::new(BTreeMap::new()),
            binding_rules: Arc::new(BTreeMap::new()),
            one_time_tokens: Arc::new(BTreeMap::new()),
            allocations: Arc::new(BTreeMap::new()),
            nodes: Arc::new(BTreeMap::new()),
            indexes: [1; TableId::COUNT],
            bootstrap_index: 0,
            latest_index: 1,
        }
    }

    /// Index of the latest mutation applied to `table`, never below 1.
    pub fn index(&self, table: TableId) -> u64 {
        self.indexes[table.pos()].max(1)
    }

    pub fn latest_index(&self) -> u64 {
        self.latest_index.max(1)
    }

    /// Create-index of the most recent bootstrap token; 0 before the first
    /// bootstrap.
    pub fn bootstrap_index(&self) -> u64 {
        self.bootstrap_index
    }

    // ----- policies ----- //

    pub fn policy(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.get(name).cloned()
    }

    pub fn policies(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.policies.values()
    }

    pub fn policies_by_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Arc<Policy>> + 'a {
        prefix_range(&self.policies, prefix).map(|(_, policy)| policy)
    }

    /// Policies whose job grant targets `(namespace, job_id)`.
    pub fn policies_for_job(&self, namespace: &str, job_id: &str) -> Vec<Arc<Policy>> {
        let floor = (SmolStr::new(namespace), SmolStr::new(job_id), SmolStr::default());
        self.job_grants
            .range((Bound::Included(floor), Bound::Unbounded))
            .take_while(|((ns, job, _), ())| ns == namespace && job == job_id)
            .filter_map(|((_, _, name), ())| self.policies.get(name).cloned())
            .collect()
    }

    // ----- tokens ----- //

    pub fn token_by_accessor(&self, accessor_id: &str) -> Option<Arc<Token>> {
        self.tokens.get(accessor_id).cloned()
    }

    pub fn token_by_secret(&self, secret_id: &str) -> Option<Arc<Token>> {
        let accessor = self.token_secrets.get(secret_id)?;
        self.tokens.get(accessor.as_str()).cloned()
    }

    /// All tokens in canonical (create index, accessor) order.
    pub fn tokens(&self) -> impl DoubleEndedIterator<Item = (u64, Arc<Token>)> + '_ {
        self.token_order.iter().filter_map(|((create_index, _), accessor)| {
            self.tokens.get(accessor.as_str()).map(|token| (*create_index, Arc::clone(token)))
        })
    }

    /// Tokens whose accessor starts with `prefix`, in accessor order.
    pub fn tokens_by_accessor_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Arc<Token>> + 'a {
        prefix_range(&self.tokens, prefix).map(|(_, token)| token)
    }

    // ----- roles ----- //

    pub fn role(&self, id: &str) -> Option<Arc<Role>> {
        self.roles.get(id).cloned()
    }

    pub fn role_by_name(&self, name: &str) -> Option<Arc<Role>> {
        let id = self.role_names.get(name)?;
        self.roles.get(id.as_str()).cloned()
    }

    /// All roles in id order.
    pub fn roles(&self) -> impl DoubleEndedIterator<Item = &Arc<Role>> {
        self.roles.values()
    }

    pub fn roles_by_name_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = Arc<Role>> + 'a {
        prefix_range(&self.role_names, prefix).filter_map(|(_, id)| self.roles.get(id.as_str()).cloned())
    }

    // ----- auth methods & binding rules ----- //

    pub fn auth_method(&self, name: &str) -> Option<Arc<AuthMethod>> {
        self.auth_methods.get(name).cloned()
    }

    pub fn auth_methods(&self) -> impl Iterator<Item = &Arc<AuthMethod>> {
        self.auth_methods.values()
    }

    pub fn binding_rule(&self, id: &str) -> Option<Arc<BindingRule>> {
        self.binding_rules.get(id).cloned()
    }

    pub fn binding_rules(&self) -> impl Iterator<Item = &Arc<BindingRule>> {
        self.binding_rules.values()
    }

    pub fn binding_rules_for_method<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a Arc<BindingRule>> + 'a {
        self.binding_rules.values().filter(move |rule| rule.auth_method == method)
    }

    // ----- one-time tokens ----- //

    pub fn one_time_token(&self, secret: &str) -> Option<Arc<OneTimeToken>> {
        self.one_time_tokens.get(secret).cloned()
    }

    pub fn one_time_tokens(&self) -> impl Iterator<Item = &Arc<OneTimeToken>> {
        self.one_time_tokens.values()
    }

    // ----- workload mirrors ----- //

    pub fn allocation(&self, id: &str) -> Option<Arc<Allocation>> {
        self.allocations.get(id).cloned()
    }

    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.get(id).cloned()
    }
}

/// Process-wide store; all mutation goes through the replicated log which
/// hands committed entries to [`crate::fsm::apply`].
pub struct StateStore {
    inner: RwLock<Snapshot>,
    notifiers: Vec<watch::Sender<u64>>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore {
            inner: RwLock::new(Snapshot::genesis()),
            notifiers: (0..TableId::COUNT).map(|_| watch::channel(1_u64).0).collect(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().clone()
    }

    pub fn index(&self, table: TableId) -> u64 {
        self.inner.read().index(table)
    }

    pub fn latest_index(&self) -> u64 {
        self.inner.read().latest_index()
    }

    /// Subscribes `watch_set` to mutations of `table`. Must be called before
    /// the snapshot used for evaluation is taken.
    pub fn subscribe(&self, watch_set: &mut WatchSet, table: TableId) {
        watch_set.subscribe(self.notifiers[table.pos()].subscribe());
    }

    fn update<R>(&self, table: TableId, index: u64, mutate: impl FnOnce(&mut Snapshot) -> R) -> R {
        let result = {
            let mut inner = self.inner.write();
            let result = mutate(&mut inner);
            inner.indexes[table.pos()] = index;
            inner.latest_index = inner.latest_index.max(index);
            result
        };
        self.notifiers[table.pos()].send_replace(index);
        result
    }

    // ----- policies ----- //

    pub(crate) fn upsert_policies(&self, index: u64, policies: Vec<Policy>) {
        self.update(TableId::Policies, index, |inner| {
            let map = Arc::make_mut(&mut inner.policies);
            let grants = Arc::make_mut(&mut inner.job_grants);
            for mut policy in policies {
                match map.get(policy.name.as_str()) {
                    Some(existing) => {
                        policy.create_index = existing.create_index;
                        if let Some(grant) = &existing.job_grant {
                            grants.remove(&(grant.namespace.clone(), grant.job_id.clone(), existing.name.clone()));
                        }
                    }
                    None => policy.create_index = index,
                }
                policy.modify_index = index;
                if let Some(grant) = &policy.job_grant {
                    grants.insert((grant.namespace.clone(), grant.job_id.clone(), policy.name.clone()), ());
                }
                map.insert(policy.name.clone(), Arc::new(policy));
            }
        });
    }

    pub(crate) fn delete_policies(&self, index: u64, names: &[SmolStr]) {
        self.update(TableId::Policies, index, |inner| {
            let map = Arc::make_mut(&mut inner.policies);
            let grants = Arc::make_mut(&mut inner.job_grants);
            for name in names {
                if let Some(policy) = map.remove(name.as_str()) {
                    if let Some(grant) = &policy.job_grant {
                        grants.remove(&(grant.namespace.clone(), grant.job_id.clone(), policy.name.clone()));
                    }
                }
            }
        });
    }

    // ----- tokens ----- //

    pub(crate) fn upsert_tokens(&self, index: u64, tokens: Vec<Token>) {
        self.update(TableId::Tokens, index, |inner| {
            for token in tokens {
                insert_token(inner, index, token);
            }
        });
    }

    /// Installs the bootstrap token and advances the watermark. The caller
    /// (the FSM) has already checked the reset gate; this upholds the
    /// single-bootstrap-token invariant by dropping any previous one.
    pub(crate) fn set_bootstrap(&self, index: u64, token: Token) {
        self.update(TableId::Tokens, index, |inner| {
            let stale: Vec<SmolStr> = inner
                .tokens
                .values()
                .filter(|existing| existing.name == BOOTSTRAP_TOKEN_NAME && existing.is_management())
                .map(|existing| existing.accessor_id.clone())
                .collect();
            remove_tokens(inner, &stale);
            insert_token(inner, index, token);
            inner.bootstrap_index = index;
        });
    }

    pub(crate) fn delete_tokens(&self, index: u64, accessors: &[SmolStr]) {
        self.update(TableId::Tokens, index, |inner| {
            remove_tokens(inner, accessors);
        });
    }

    // ----- roles ----- //

    pub(crate) fn upsert_roles(&self, index: u64, roles: Vec<Role>) {
        self.update(TableId::Roles, index, |inner| {
            let map = Arc::make_mut(&mut inner.roles);
            let names = Arc::make_mut(&mut inner.role_names);
            for mut role in roles {
                match map.get(role.id.as_str()) {
                    Some(existing) => {
                        role.create_index = existing.create_index;
                        names.remove(existing.name.as_str());
                    }
                    None => role.create_index = index,
                }
                role.modify_index = index;
                names.insert(role.name.clone(), role.id.clone());
                map.insert(role.id.clone(), Arc::new(role));
            }
        });
    }

    pub(crate) fn delete_roles(&self, index: u64, ids: &[SmolStr]) {
        self.update(TableId::Roles, index, |inner| {
            let map = Arc::make_mut(&mut inner.roles);
            let names = Arc::make_mut(&mut inner.role_names);
            for id in ids {
                if let Some(role) = map.remove(id.as_str()) {
                    names.remove(role.name.as_str());
                }
            }
        });
    }

    // ----- auth methods & binding rules ----- //

    pub(crate) fn upsert_auth_methods(&self, index: u64, methods: Vec<AuthMethod>) {
        self.update(TableId::AuthMethods, index, |inner| {
            let map = Arc::make_mut(&mut inner.auth_methods);
            for mut method in methods {
                match map.get(method.name.as_str()) {
                    Some(existing) => method.create_index = existing.create_index,
                    None => method.create_index = index,
                }
                method.modify_index = index;
                map.insert(method.name.clone(), Arc::new(method));
            }
        });
    }

    pub(crate) fn delete_auth_methods(&self, index: u64, names: &[SmolStr]) {
        self.update(TableId::AuthMethods, index, |inner| {
            let map = Arc::make_mut(&mut inner.auth_methods);
            for name in names {
                map.remove(name.as_str());
            }
        });
    }

    pub(crate) fn upsert_binding_rules(&self, index: u64, rules: Vec<BindingRule>) {
        self.update(TableId::BindingRules, index, |inner| {
            let map = Arc::make_mut(&mut inner.binding_rules);
            for mut rule in rules {
                match map.get(rule.id.as_str()) {
                    Some(existing) => rule.create_index = existing.create_index,
                    None => rule.create_index = index,
                }
                rule.modify_index = index;
                map.insert(rule.id.clone(), Arc::new(rule));
            }
        });
    }

    pub(crate) fn delete_binding_rules(&self, index: u64, ids: &[SmolStr]) {
        self.update(TableId::BindingRules, index, |inner| {
            let map = Arc::make_mut(&mut inner.binding_rules);
            for id in ids {
                map.remove(id.as_str());
            }
        });
    }

    // ----- one-time tokens ----- //

    pub(crate) fn upsert_one_time_token(&self, index: u64, mut ott: OneTimeToken) {
        self.update(TableId::OneTimeTokens, index, |inner| {
            let map = Arc::make_mut(&mut inner.one_time_tokens);
            ott.create_index = index;
            ott.modify_index = index;
            map.insert(ott.one_time_secret_id.clone(), Arc::new(ott));
        });
    }

    /// Compare-and-delete for the exchange path; reports whether the secret
    /// was present so the endpoint can map a lost race to permission-denied.
    pub(crate) fn delete_one_time_token(&self, index: u64, secret: &str) -> bool {
        self.update(TableId::OneTimeTokens, index, |inner| {
            Arc::make_mut(&mut inner.one_time_tokens).remove(secret).is_some()
        })
    }

    /// Removes every one-time token past expiration at `now`.
    pub(crate) fn expire_one_time_tokens(&self, index: u64, now: OffsetDateTime) -> usize {
        self.update(TableId::OneTimeTokens, index, |inner| {
            let map = Arc::make_mut(&mut inner.one_time_tokens);
            let expired: Vec<SmolStr> = map
                .values()
                .filter(|ott| ott.is_expired(now))
                .map(|ott| ott.one_time_secret_id.clone())
                .collect();
            for secret in &expired {
                map.remove(secret.as_str());
            }
            expired.len()
        })
    }

    // ----- workload mirrors (fed by the scheduler's replication stream) ----- //

    pub fn upsert_allocations(&self, index: u64, allocations: Vec<Allocation>) {
        self.update(TableId::Allocations, index, |inner| {
            let map = Arc::make_mut(&mut inner.allocations);
            for allocation in allocations {
                map.insert(allocation.id.clone(), Arc::new(allocation));
            }
        });
    }

    pub fn upsert_nodes(&self, index: u64, nodes: Vec<Node>) {
        self.update(TableId::Nodes, index, |inner| {
            let map = Arc::make_mut(&mut inner.nodes);
            for node in nodes {
                map.insert(node.id.clone(), Arc::new(node));
            }
        });
    }
}

impl Default for StateStore {
    fn default() -> Self {
        StateStore::new()
    }
}

fn insert_token(inner: &mut Snapshot, index: u64, mut token: Token) {
    let tokens = Arc::make_mut(&mut inner.tokens);
    let secrets = Arc::make_mut(&mut inner.token_secrets);
    let order = Arc::make_mut(&mut inner.token_order);

    match tokens.get(token.accessor_id.as_str()) {
        Some(existing) => {
            token.create_index = existing.create_index;
            secrets.remove(existing.secret_id.as_str());
            order.remove(&(existing.create_index, existing.accessor_id.clone()));
        }
        None => token.create_index = index,
    }
    token.modify_index = index;

    secrets.insert(token.secret_id.clone(), token.accessor_id.clone());
    order.insert((token.create_index, token.accessor_id.clone()), token.accessor_id.clone());
    tokens.insert(token.accessor_id.clone(), Arc::new(token));
}

fn remove_tokens(inner: &mut Snapshot, accessors: &[SmolStr]) {
    let tokens = Arc::make_mut(&mut inner.tokens);
    let secrets = Arc::make_mut(&mut inner.token_secrets);
    let order = Arc::make_mut(&mut inner.token_order);

    for accessor in accessors {
        if let Some(token) = tokens.remove(accessor.as_str()) {
            secrets.remove(token.secret_id.as_str());
            order.remove(&(token.create_index, token.accessor_id.clone()));
        }
    }
}

fn prefix_range<'a, V>(map: &'a BTreeMap<SmolStr, V>, prefix: &'a str) -> impl Iterator<Item = (&'a SmolStr, &'a V)> + 'a {
    map.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(key, _)| key.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str) -> Policy {
        Policy::new(name, "[node]\npolicy = \"read\"\n")
    }

    #[test]
    fn snapshots_are_isolated_from_writes() {
        let store = StateStore::new();
        store.upsert_policies(2, vec![policy("a")]);

        let before = store.snapshot();
        store.upsert_policies(3, vec![policy("b")]);
        let after = store.snapshot();

        assert!(before.policy("b").is_none());
        assert!(after.policy("b").is_some());
        assert_eq!(before.index(TableId::Policies), 2);
        assert_eq!(after.index(TableId::Policies), 3);
    }

    #[test]
    fn create_index_survives_updates() {
        let store = StateStore::new();
        store.upsert_policies(5, vec![policy("a")]);
        store.upsert_policies(9, vec![policy("a")]);

        let snap = store.snapshot();
        let stored = snap.policy("a").expect("policy exists");
        assert_eq!(stored.create_index, 5);
        assert_eq!(stored.modify_index, 9);
    }

    #[test]
    fn token_secret_index_follows_rotation() {
        let store = StateStore::new();
        let mut token = Token::new_client("t", Vec::new(), Vec::new());
        let old_secret = token.secret_id.clone();
        store.upsert_tokens(2, vec![token.clone()]);

        token.secret_id = crate::types::Token::new_client("", Vec::new(), Vec::new()).secret_id;
        store.upsert_tokens(3, vec![token.clone()]);

        let snap = store.snapshot();
        assert!(snap.token_by_secret(&old_secret).is_none());
        assert!(snap.token_by_secret(&token.secret_id).is_some());
    }

    #[test]
    fn canonical_token_order() {
        let store = StateStore::new();
        let mut a = Token::new_client("a", Vec::new(), Vec::new());
        let mut b = Token::new_client("b", Vec::new(), Vec::new());
        a.accessor_id = "bbbb".into();
        b.accessor_id = "aaaa".into();
        store.upsert_tokens(2, vec![a]);
        store.upsert_tokens(3, vec![b]);

        let snap = store.snapshot();
        let order: Vec<(u64, SmolStr)> = snap.tokens().map(|(idx, t)| (idx, t.accessor_id.clone())).collect();
        assert_eq!(order, vec![(2, SmolStr::new("bbbb")), (3, SmolStr::new("aaaa"))]);
    }

    #[test]
    fn job_grant_index_tracks_policy_lifecycle() {
        let store = StateStore::new();
        let mut scoped = policy("wi");
        scoped.job_grant = Some(crate::types::JobGrant {
            namespace: "default".into(),
            job_id: "api".into(),
            group: SmolStr::default(),
            task: SmolStr::default(),
        });
        store.upsert_policies(2, vec![scoped]);

        let snap = store.snapshot();
        assert_eq!(snap.policies_for_job("default", "api").len(), 1);
        assert!(snap.policies_for_job("default", "other").is_empty());

        store.delete_policies(3, &[SmolStr::new("wi")]);
        assert!(store.snapshot().policies_for_job("default", "api").is_empty());
    }

    #[test]
    fn bootstrap_replaces_previous_token() {
        let store = StateStore::new();
        let mut first = Token::new_client("", Vec::new(), Vec::new());
        first.name = BOOTSTRAP_TOKEN_NAME.to_owned();
        first.token_type = crate::types::TokenType::Management;
        let first_accessor = first.accessor_id.clone();
        store.set_bootstrap(2, first);

        let mut second = Token::new_client("", Vec::new(), Vec::new());
        second.name = BOOTSTRAP_TOKEN_NAME.to_owned();
        second.token_type = crate::types::TokenType::Management;
        store.set_bootstrap(7, second.clone());

        let snap = store.snapshot();
        assert!(snap.token_by_accessor(&first_accessor).is_none());
        assert!(snap.token_by_accessor(&second.accessor_id).is_some());
        assert_eq!(snap.bootstrap_index(), 7);
    }
}
