//! Proptest strategies shared by the regatta-acl property suites.

use proptest::collection::vec;
use proptest::prelude::*;
use regatta_acl::types::{Policy, PolicyLink, Role, Token};
use smol_str::SmolStr;

pub fn uuid_str() -> impl Strategy<Value = String> {
    "[[:digit:]]{8}-([[:digit:]]{4}-){3}[[:digit:]]{12}".no_shrink()
}

pub fn policy_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,24}".no_shrink()
}

pub fn namespace_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}"
}

pub fn disposition() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("read"), Just("write"), Just("list"), Just("deny")].no_shrink()
}

/// A syntactically valid policy rule document with 1..4 namespace tables.
/// Namespace patterns are deduplicated: TOML rejects repeated tables.
pub fn rule_document() -> impl Strategy<Value = String> {
    vec((namespace_name(), disposition()), 1..4).prop_map(|tables| {
        let tables: std::collections::BTreeMap<String, &'static str> = tables.into_iter().collect();
        let mut doc = String::new();
        for (namespace, policy) in tables {
            doc.push_str(&format!("[namespace.\"{namespace}\"]\npolicy = \"{policy}\"\n\n"));
        }
        doc
    })
}

pub fn policy() -> impl Strategy<Value = Policy> {
    (policy_name(), rule_document()).prop_map(|(name, rules)| Policy::new(SmolStr::new(name), rules))
}

/// Distinctly named policies, which is what every store upsert requires.
pub fn policies(max: usize) -> impl Strategy<Value = Vec<Policy>> {
    vec(policy(), 1..max).prop_map(|mut policies| {
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        policies.dedup_by(|a, b| a.name == b.name);
        policies
    })
}

pub fn role(policy_names: Vec<SmolStr>) -> impl Strategy<Value = Role> {
    policy_name().prop_map(move |name| {
        Role::new(
            SmolStr::new(name),
            policy_names.iter().map(|name| PolicyLink::new(name.clone())).collect(),
        )
    })
}

/// A client token referencing an arbitrary subset of `policy_names`.
pub fn client_token(policy_names: Vec<SmolStr>) -> impl Strategy<Value = Token> {
    let len = policy_names.len();
    proptest::sample::subsequence(policy_names, 0..=len)
        .prop_map(|subset| Token::new_client("generated", subset, Vec::new()))
}
