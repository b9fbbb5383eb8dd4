//! The operator-facing policy rule language.
//!
//! Rule text is a TOML document naming the scopes a policy speaks for:
//!
//! ```toml
//! [namespace."default"]
//! policy = "read"
//! capabilities = ["submit-job"]
//!
//! [namespace."team-*"]
//! policy = "write"
//!
//! [host_volume."ci-scratch"]
//! policy = "write"
//!
//! [node]
//! policy = "read"
//! ```
//!
//! Parsing is strict: unknown tables, unknown dispositions and unknown
//! capability names are errors, surfaced with the `failed to parse` prefix
//! the write path promises to callers.

use core::fmt;
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to parse ACL rules: {detail}")]
pub struct RuleParseError {
    detail: String,
}

impl RuleParseError {
    fn new(detail: impl Into<String>) -> Self {
        RuleParseError { detail: detail.into() }
    }
}

/// Parsed form of one policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub namespaces: Vec<NamespaceRule>,
    pub host_volumes: Vec<HostVolumeRule>,
    pub node: Option<Disposition>,
    pub agent: Option<Disposition>,
    pub operator: Option<Disposition>,
    pub plugin: Option<PluginDisposition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRule {
    /// Namespace name, optionally containing `*` globs.
    pub pattern: SmolStr,
    pub capabilities: Vec<NamespaceCapability>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVolumeRule {
    pub pattern: SmolStr,
    pub capabilities: Vec<HostVolumeCapability>,
}

/// Coarse-grained policy dispositions accepted by `policy = "…"` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Deny,
    Read,
    Write,
    List,
}

impl FromStr for Disposition {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny" => Ok(Disposition::Deny),
            "read" => Ok(Disposition::Read),
            "write" => Ok(Disposition::Write),
            "list" => Ok(Disposition::List),
            other => Err(RuleParseError::new(format!("unknown policy disposition {other:?}"))),
        }
    }
}

/// Plugin scope accepts `read`, `list` and `deny` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginDisposition {
    Deny,
    Read,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NamespaceCapability {
    Deny,
    ListJobs,
    ReadJob,
    SubmitJob,
    DispatchJob,
    ReadLogs,
    ReadFs,
    AllocExec,
    AllocLifecycle,
    ScaleJob,
}

impl NamespaceCapability {
    pub const fn as_str(self) -> &'static str {
        match self {
            NamespaceCapability::Deny => "deny",
            NamespaceCapability::ListJobs => "list-jobs",
            NamespaceCapability::ReadJob => "read-job",
            NamespaceCapability::SubmitJob => "submit-job",
            NamespaceCapability::DispatchJob => "dispatch-job",
            NamespaceCapability::ReadLogs => "read-logs",
            NamespaceCapability::ReadFs => "read-fs",
            NamespaceCapability::AllocExec => "alloc-exec",
            NamespaceCapability::AllocLifecycle => "alloc-lifecycle",
            NamespaceCapability::ScaleJob => "scale-job",
        }
    }
}

impl fmt::Display for NamespaceCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamespaceCapability {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny" => Ok(NamespaceCapability::Deny),
            "list-jobs" => Ok(NamespaceCapability::ListJobs),
            "read-job" => Ok(NamespaceCapability::ReadJob),
            "submit-job" => Ok(NamespaceCapability::SubmitJob),
            "dispatch-job" => Ok(NamespaceCapability::DispatchJob),
            "read-logs" => Ok(NamespaceCapability::ReadLogs),
            "read-fs" => Ok(NamespaceCapability::ReadFs),
            "alloc-exec" => Ok(NamespaceCapability::AllocExec),
            "alloc-lifecycle" => Ok(NamespaceCapability::AllocLifecycle),
            "scale-job" => Ok(NamespaceCapability::ScaleJob),
            other => Err(RuleParseError::new(format!("unknown namespace capability {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostVolumeCapability {
    Deny,
    MountReadonly,
    MountReadwrite,
    Create,
    Delete,
}

impl HostVolumeCapability {
    pub const fn as_str(self) -> &'static str {
        match self {
            HostVolumeCapability::Deny => "deny",
            HostVolumeCapability::MountReadonly => "mount-readonly",
            HostVolumeCapability::MountReadwrite => "mount-readwrite",
            HostVolumeCapability::Create => "create",
            HostVolumeCapability::Delete => "delete",
        }
    }
}

impl FromStr for HostVolumeCapability {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny" => Ok(HostVolumeCapability::Deny),
            "mount-readonly" => Ok(HostVolumeCapability::MountReadonly),
            "mount-readwrite" => Ok(HostVolumeCapability::MountReadwrite),
            "create" => Ok(HostVolumeCapability::Create),
            "delete" => Ok(HostVolumeCapability::Delete),
            other => Err(RuleParseError::new(format!("unknown host volume capability {other:?}"))),
        }
    }
}

// ----- document shape ----- //

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDoc {
    #[serde(default)]
    namespace: BTreeMap<String, ScopeDoc>,
    #[serde(default)]
    host_volume: BTreeMap<String, ScopeDoc>,
    node: Option<LeafDoc>,
    agent: Option<LeafDoc>,
    operator: Option<LeafDoc>,
    plugin: Option<LeafDoc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScopeDoc {
    policy: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LeafDoc {
    policy: String,
}

/// Parses and validates one policy document.
pub fn parse_rules(text: &str) -> Result<RuleSet, RuleParseError> {
    let doc: RuleDoc = toml::from_str(text).map_err(|source| RuleParseError::new(source.to_string()))?;

    let mut rule_set = RuleSet::default();

    for (pattern, scope) in &doc.namespace {
        if pattern.is_empty() {
            return Err(RuleParseError::new("namespace pattern must not be empty"));
        }
        let mut capabilities = Vec::new();
        if let Some(policy) = &scope.policy {
            capabilities.extend_from_slice(expand_namespace_disposition(policy.parse()?));
        }
        for name in &scope.capabilities {
            let capability: NamespaceCapability = name.parse()?;
            if !capabilities.contains(&capability) {
                capabilities.push(capability);
            }
        }
        if capabilities.is_empty() {
            return Err(RuleParseError::new(format!(
                "namespace {pattern:?} grants neither a policy nor capabilities"
            )));
        }
        rule_set.namespaces.push(NamespaceRule {
            pattern: SmolStr::new(pattern),
            capabilities,
        });
    }

    for (pattern, scope) in &doc.host_volume {
        if pattern.is_empty() {
            return Err(RuleParseError::new("host volume pattern must not be empty"));
        }
        let mut capabilities = Vec::new();
        if let Some(policy) = &scope.policy {
            capabilities.extend_from_slice(expand_host_volume_disposition(policy.parse()?));
        }
        for name in &scope.capabilities {
            let capability: HostVolumeCapability = name.parse()?;
            if !capabilities.contains(&capability) {
                capabilities.push(capability);
            }
        }
        if capabilities.is_empty() {
            return Err(RuleParseError::new(format!(
                "host volume {pattern:?} grants neither a policy nor capabilities"
            )));
        }
        rule_set.host_volumes.push(HostVolumeRule {
            pattern: SmolStr::new(pattern),
            capabilities,
        });
    }

    if let Some(leaf) = &doc.node {
        rule_set.node = Some(parse_leaf(&leaf.policy, "node")?);
    }
    if let Some(leaf) = &doc.agent {
        rule_set.agent = Some(parse_leaf(&leaf.policy, "agent")?);
    }
    if let Some(leaf) = &doc.operator {
        rule_set.operator = Some(parse_leaf(&leaf.policy, "operator")?);
    }
    if let Some(leaf) = &doc.plugin {
        rule_set.plugin = Some(match leaf.policy.as_str() {
            "deny" => PluginDisposition::Deny,
            "read" => PluginDisposition::Read,
            "list" => PluginDisposition::List,
            other => {
                return Err(RuleParseError::new(format!("unknown plugin disposition {other:?}")));
            }
        });
    }

    Ok(rule_set)
}

fn parse_leaf(policy: &str, scope: &str) -> Result<Disposition, RuleParseError> {
    let disposition: Disposition = policy.parse()?;
    if disposition == Disposition::List {
        return Err(RuleParseError::new(format!("disposition \"list\" is not valid for {scope}")));
    }
    Ok(disposition)
}

fn expand_namespace_disposition(disposition: Disposition) -> &'static [NamespaceCapability] {
    use NamespaceCapability::*;

    match disposition {
        Disposition::Deny => &[Deny],
        Disposition::List => &[ListJobs],
        Disposition::Read => &[ListJobs, ReadJob],
        Disposition::Write => &[
            ListJobs,
            ReadJob,
            SubmitJob,
            DispatchJob,
            ReadLogs,
            ReadFs,
            AllocExec,
            AllocLifecycle,
            ScaleJob,
        ],
    }
}

fn expand_host_volume_disposition(disposition: Disposition) -> &'static [HostVolumeCapability] {
    use HostVolumeCapability::*;

    match disposition {
        Disposition::Deny => &[Deny],
        // `list` has no meaning for volumes; it expands to nothing and the
        // empty-scope check rejects it.
        Disposition::List => &[],
        Disposition::Read => &[MountReadonly],
        Disposition::Write => &[MountReadonly, MountReadwrite, Create, Delete],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let text = r#"
            [namespace."default"]
            policy = "read"
            capabilities = ["submit-job"]

            [namespace."team-*"]
            policy = "write"

            [host_volume."ci-scratch"]
            policy = "write"

            [node]
            policy = "read"

            [plugin]
            policy = "list"
        "#;

        let rules = parse_rules(text).expect("document is valid");
        assert_eq!(rules.namespaces.len(), 2);
        assert_eq!(rules.namespaces[0].pattern, "default");
        assert!(rules.namespaces[0].capabilities.contains(&NamespaceCapability::SubmitJob));
        assert!(rules.namespaces[0].capabilities.contains(&NamespaceCapability::ReadJob));
        assert_eq!(rules.node, Some(Disposition::Read));
        assert_eq!(rules.plugin, Some(PluginDisposition::List));
    }

    #[test]
    fn rejects_unknown_table() {
        let err = parse_rules("[quota]\npolicy = \"read\"\n").expect_err("unknown table");
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn rejects_unknown_capability() {
        let err = parse_rules("[namespace.\"default\"]\ncapabilities = [\"fly-job\"]\n").expect_err("unknown capability");
        assert!(err.to_string().contains("failed to parse"));
        assert!(err.to_string().contains("fly-job"));
    }

    #[test]
    fn rejects_non_toml() {
        let err = parse_rules("namespace { policy = }").expect_err("not toml");
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn rejects_empty_scope() {
        let err = parse_rules("[namespace.\"default\"]\n").expect_err("empty scope");
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn list_is_rejected_outside_namespaces() {
        assert!(parse_rules("[node]\npolicy = \"list\"\n").is_err());
        assert!(parse_rules("[host_volume.\"v\"]\npolicy = \"list\"\n").is_err());
    }
}
