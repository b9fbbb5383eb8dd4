//! Resolver properties: idempotence, policy-skip tolerance, management
//! supremacy.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use proptest::prelude::*;
use regatta_acl::compiler::CapabilityCache;
use regatta_acl::config::ConfHandle;
use regatta_acl::fsm::{self, LogEntry};
use regatta_acl::resolver::TokenResolver;
use regatta_acl::rules::NamespaceCapability;
use regatta_acl::state::StateStore;
use regatta_acl::types::{Policy, Token, TokenType};
use regatta_acl_generators as generators;
use smol_str::SmolStr;

fn enabled_conf() -> ConfHandle {
    ConfHandle::from_json(r#"{ "DataDir": "/tmp/regatta-resolver-tests", "ACL": { "Enabled": true } }"#)
        .expect("valid config")
}

fn resolver_for(store: &Arc<StateStore>) -> TokenResolver {
    TokenResolver::builder()
        .conf(enabled_conf())
        .store(Arc::clone(store))
        .cache(Arc::new(CapabilityCache::default()))
        .build()
}

fn store_with(policies: Vec<Policy>, tokens: Vec<Token>) -> Arc<StateStore> {
    let store = Arc::new(StateStore::new());
    fsm::apply(&store, 2, LogEntry::PolicyUpsert { policies }).expect("apply succeeds");
    fsm::apply(&store, 3, LogEntry::TokenUpsert { tokens }).expect("apply succeeds");
    store
}

proptest! {
    /// Resolving the same secret against the same snapshot always yields an
    /// equal capability object.
    #[test]
    fn resolution_is_idempotent(policies in generators::policies(5)) {
        let names: Vec<SmolStr> = policies.iter().map(|policy| policy.name.clone()).collect();
        let token = Token::new_client("t", names, Vec::new());
        let secret = token.secret_id.clone();
        let store = store_with(policies, vec![token]);
        let resolver = resolver_for(&store);

        let snapshot = store.snapshot();
        let first = resolver.resolve_in(&snapshot, &secret).expect("resolves");
        let second = resolver.resolve_in(&snapshot, &secret).expect("resolves");
        prop_assert_eq!(first, second);
    }

    /// Deleting any subset Q of a token's policies leaves it resolvable,
    /// equivalent to a token compiled from P \ Q.
    #[test]
    fn policy_skip_tolerance(
        policies in generators::policies(6),
        subset_seed in proptest::collection::vec(any::<bool>(), 6),
    ) {
        let names: Vec<SmolStr> = policies.iter().map(|policy| policy.name.clone()).collect();
        let deleted: Vec<SmolStr> = names
            .iter()
            .zip(subset_seed.iter())
            .filter(|&(_, &delete)| delete)
            .map(|(name, _)| name.clone())
            .collect();
        let kept: Vec<SmolStr> = names.iter().filter(|name| !deleted.contains(name)).cloned().collect();

        let token = Token::new_client("all", names.clone(), Vec::new());
        let witness = Token::new_client("kept", kept, Vec::new());
        let secret = token.secret_id.clone();
        let witness_secret = witness.secret_id.clone();

        let store = store_with(policies, vec![token, witness]);
        fsm::apply(&store, 4, LogEntry::PolicyDelete { names: deleted }).expect("apply succeeds");

        let resolver = resolver_for(&store);
        let snapshot = store.snapshot();
        let resolved = resolver.resolve_in(&snapshot, &secret).expect("still resolvable");
        let expected = resolver.resolve_in(&snapshot, &witness_secret).expect("resolves");
        prop_assert_eq!(resolved, expected);
    }
}

#[test]
fn management_token_passes_arbitrary_checks() {
    let mut token = Token::new_client("mgmt", Vec::new(), Vec::new());
    token.token_type = TokenType::Management;
    let secret = token.secret_id.clone();

    let store = store_with(Vec::new(), vec![token]);
    let resolver = resolver_for(&store);

    let capability = resolver.resolve(&secret).expect("resolves");
    assert!(capability.is_management());
    assert!(capability.allow_namespace_operation("any-namespace", NamespaceCapability::AllocExec));
    assert!(capability.allow_node_write());
    assert!(capability.allow_agent_write());
    assert!(capability.allow_plugin_list());
}

#[test]
fn tokens_sharing_a_policy_set_share_the_compiled_object() {
    let policies = vec![Policy::new("p", "[namespace.\"default\"]\npolicy = \"read\"\n")];
    let a = Token::new_client("a", vec![SmolStr::new("p")], Vec::new());
    let b = Token::new_client("b", vec![SmolStr::new("p")], Vec::new());
    let (secret_a, secret_b) = (a.secret_id.clone(), b.secret_id.clone());

    let store = store_with(policies, vec![a, b]);
    let resolver = resolver_for(&store);
    let snapshot = store.snapshot();

    let capability_a = resolver.resolve_in(&snapshot, &secret_a).expect("resolves");
    let capability_b = resolver.resolve_in(&snapshot, &secret_b).expect("resolves");
    assert_eq!(capability_a, capability_b);
}
