//! Compiled, immutable capability objects.
//!
//! Every RPC handler resolves the caller's secret to a [`Capability`] and
//! asks it questions of the shape "may this caller perform X against scope
//! Y?". Objects are cheap to clone (an `Arc` handle) and safe to share
//! across tasks; once compiled they never change.

use std::collections::BTreeSet;
use std::sync::Arc;

use nonempty::NonEmpty;
use smol_str::SmolStr;

use crate::rules::{Disposition, HostVolumeCapability, NamespaceCapability, PluginDisposition, RuleSet};

/// The answer-everything sentinel versus a compiled rule tree.
///
/// `Disabled` is returned by the resolver when ACL enforcement is switched
/// off globally; every query on it is total and permits the operation.
#[derive(Debug, Clone)]
pub enum Capability {
    Disabled,
    Enabled(Arc<CapabilitySet>),
}

/// Structural equality; two independently compiled objects over the same
/// policy content compare equal.
impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Capability::Disabled, Capability::Disabled) => true,
            (Capability::Enabled(a), Capability::Enabled(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Capability {}

impl Capability {
    pub fn management() -> Self {
        Capability::Enabled(Arc::new(CapabilitySet::management()))
    }

    pub fn compile(rule_sets: &[RuleSet]) -> Self {
        Capability::Enabled(Arc::new(CapabilitySet::compile(rule_sets)))
    }

    pub fn is_management(&self) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => set.management,
        }
    }

    pub fn allow_namespace_operation(&self, namespace: &str, capability: NamespaceCapability) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => set.allow_namespace_operation(namespace, capability),
        }
    }

    /// Whether the caller has any non-deny grant in `namespace`.
    pub fn allow_namespace(&self, namespace: &str) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => set.allow_namespace(namespace),
        }
    }

    pub fn allow_host_volume_operation(&self, volume: &str, capability: HostVolumeCapability) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => set.allow_host_volume_operation(volume, capability),
        }
    }

    pub fn allow_node_read(&self) -> bool {
        self.allow_leaf(|set| set.node, Disposition::Read)
    }

    pub fn allow_node_write(&self) -> bool {
        self.allow_leaf(|set| set.node, Disposition::Write)
    }

    pub fn allow_agent_read(&self) -> bool {
        self.allow_leaf(|set| set.agent, Disposition::Read)
    }

    pub fn allow_agent_write(&self) -> bool {
        self.allow_leaf(|set| set.agent, Disposition::Write)
    }

    pub fn allow_operator_read(&self) -> bool {
        self.allow_leaf(|set| set.operator, Disposition::Read)
    }

    pub fn allow_operator_write(&self) -> bool {
        self.allow_leaf(|set| set.operator, Disposition::Write)
    }

    pub fn allow_plugin_read(&self) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => set.management || matches!(set.plugin, Some(PluginDisposition::Read)),
        }
    }

    pub fn allow_plugin_list(&self) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => {
                set.management || matches!(set.plugin, Some(PluginDisposition::Read | PluginDisposition::List))
            }
        }
    }

    fn allow_leaf(&self, select: impl Fn(&CapabilitySet) -> Option<Disposition>, needed: Disposition) -> bool {
        match self {
            Capability::Disabled => true,
            Capability::Enabled(set) => {
                if set.management {
                    return true;
                }
                match select(set) {
                    Some(Disposition::Write) => true,
                    Some(Disposition::Read) => needed == Disposition::Read,
                    Some(Disposition::Deny) | Some(Disposition::List) | None => false,
                }
            }
        }
    }
}

/// Union of one or more parsed rule sets.
///
/// Merging is additive except for the `deny` capability, which wins over
/// everything granted to the same pattern by any other policy in the set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    management: bool,
    namespaces: Vec<ScopeGrants<NamespaceCapability>>,
    host_volumes: Vec<ScopeGrants<HostVolumeCapability>>,
    node: Option<Disposition>,
    agent: Option<Disposition>,
    operator: Option<Disposition>,
    plugin: Option<PluginDisposition>,
}

#[derive(Debug, PartialEq, Eq)]
struct ScopeGrants<C> {
    pattern: SmolStr,
    capabilities: BTreeSet<C>,
}

impl CapabilitySet {
    pub fn management() -> Self {
        CapabilitySet {
            management: true,
            ..CapabilitySet::default()
        }
    }

    pub fn compile(rule_sets: &[RuleSet]) -> Self {
        let mut set = CapabilitySet::default();

        for rules in rule_sets {
            for rule in &rules.namespaces {
                merge_scope(&mut set.namespaces, &rule.pattern, &rule.capabilities);
            }
            for rule in &rules.host_volumes {
                merge_scope(&mut set.host_volumes, &rule.pattern, &rule.capabilities);
            }
            set.node = merge_leaf(set.node, rules.node);
            set.agent = merge_leaf(set.agent, rules.agent);
            set.operator = merge_leaf(set.operator, rules.operator);
            set.plugin = merge_plugin(set.plugin, rules.plugin);
        }

        set
    }

    pub fn is_management(&self) -> bool {
        self.management
    }

    fn allow_namespace_operation(&self, namespace: &str, capability: NamespaceCapability) -> bool {
        if self.management {
            return true;
        }
        match most_specific(&self.namespaces, namespace) {
            Some(grants) => !grants.contains(&NamespaceCapability::Deny) && grants.contains(&capability),
            None => false,
        }
    }

    fn allow_namespace(&self, namespace: &str) -> bool {
        if self.management {
            return true;
        }
        match most_specific(&self.namespaces, namespace) {
            Some(grants) => !grants.contains(&NamespaceCapability::Deny) && !grants.is_empty(),
            None => false,
        }
    }

    fn allow_host_volume_operation(&self, volume: &str, capability: HostVolumeCapability) -> bool {
        if self.management {
            return true;
        }
        match most_specific(&self.host_volumes, volume) {
            Some(grants) => !grants.contains(&HostVolumeCapability::Deny) && grants.contains(&capability),
            None => false,
        }
    }
}

fn merge_scope<C: Ord + Copy>(scopes: &mut Vec<ScopeGrants<C>>, pattern: &SmolStr, capabilities: &[C]) {
    if let Some(existing) = scopes.iter_mut().find(|scope| scope.pattern == *pattern) {
        existing.capabilities.extend(capabilities.iter().copied());
    } else {
        scopes.push(ScopeGrants {
            pattern: pattern.clone(),
            capabilities: capabilities.iter().copied().collect(),
        });
    }
}

fn merge_leaf(current: Option<Disposition>, incoming: Option<Disposition>) -> Option<Disposition> {
    match (current, incoming) {
        (value, None) => value,
        (None, value) => value,
        // Deny dominates; otherwise the stronger grant wins.
        (Some(Disposition::Deny), _) | (_, Some(Disposition::Deny)) => Some(Disposition::Deny),
        (Some(Disposition::Write), _) | (_, Some(Disposition::Write)) => Some(Disposition::Write),
        (Some(Disposition::Read), _) | (_, Some(Disposition::Read)) => Some(Disposition::Read),
        (Some(Disposition::List), Some(Disposition::List)) => Some(Disposition::List),
    }
}

fn merge_plugin(current: Option<PluginDisposition>, incoming: Option<PluginDisposition>) -> Option<PluginDisposition> {
    match (current, incoming) {
        (value, None) => value,
        (None, value) => value,
        (Some(PluginDisposition::Deny), _) | (_, Some(PluginDisposition::Deny)) => Some(PluginDisposition::Deny),
        (Some(PluginDisposition::Read), _) | (_, Some(PluginDisposition::Read)) => Some(PluginDisposition::Read),
        (Some(PluginDisposition::List), Some(PluginDisposition::List)) => Some(PluginDisposition::List),
    }
}

fn most_specific<'a, C>(scopes: &'a [ScopeGrants<C>], value: &str) -> Option<&'a BTreeSet<C>> {
    scopes
        .iter()
        .filter(|scope| glob_match(&scope.pattern, value))
        .max_by_key(|scope| specificity(&scope.pattern))
        .map(|scope| &scope.capabilities)
}

/// Literal characters matched by the pattern; ties go to the longer pattern.
fn specificity(pattern: &str) -> (usize, usize) {
    let literal = pattern.chars().filter(|&c| c != '*').count();
    (literal, pattern.len())
}

/// `*` matches any run of characters, including the empty run.
fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();

    // Classic two-pointer scan with backtracking to the last star.
    let (mut p, mut v) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && (pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, v));
            p += 1;
        } else if let Some((star_p, star_v)) = star {
            p = star_p + 1;
            v = star_v + 1;
            star = Some((star_p, star_v + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

/// Predicate over `(capability, namespace)` requiring at least one of a set
/// of capabilities, with management always passing.
#[derive(Debug, Clone)]
pub struct NamespaceValidator {
    required: NonEmpty<NamespaceCapability>,
}

impl NamespaceValidator {
    pub fn new(required: NonEmpty<NamespaceCapability>) -> Self {
        NamespaceValidator { required }
    }

    pub fn any_of(first: NamespaceCapability, rest: &[NamespaceCapability]) -> Self {
        let mut required = NonEmpty::new(first);
        required.extend(rest.iter().copied());
        NamespaceValidator { required }
    }

    pub fn allows(&self, capability: &Capability, namespace: &str) -> bool {
        if capability.is_management() {
            return true;
        }
        self.required
            .iter()
            .any(|&needed| capability.allow_namespace_operation(namespace, needed))
    }
}
