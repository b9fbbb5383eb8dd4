use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Claims asserted by a cluster-signed workload identity JWT.
///
/// Produced by [`crate::claims`] after signature and temporal validation;
/// never persisted. Grant resolution scopes the claim to the allocation's
/// job through the policy job-grant index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default = "IdentityClaims::default_namespace")]
    pub namespace: SmolStr,
    pub job_id: SmolStr,
    pub alloc_id: SmolStr,
    pub task: SmolStr,
    /// Standard `sub` claim, `<namespace>/<job>/<task>` by convention.
    #[serde(default)]
    pub sub: String,
}

impl IdentityClaims {
    fn default_namespace() -> SmolStr {
        SmolStr::new_static("default")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocClientStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
}

/// Read-only view of an allocation, sufficient for claim verification.
///
/// The scheduler owns the full allocation record; only identity-relevant
/// fields are mirrored into the ACL tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Allocation {
    #[serde(rename = "ID")]
    pub id: SmolStr,
    pub namespace: SmolStr,
    #[serde(rename = "JobID")]
    pub job_id: SmolStr,
    #[serde(rename = "ParentJobID", default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<SmolStr>,
    pub task_group: SmolStr,
    pub client_status: AllocClientStatus,
    #[serde(default)]
    pub desired_stop: bool,
}

impl Allocation {
    /// Terminal allocations no longer run workloads; identity claims over
    /// them are treated as expired.
    pub fn is_terminal(&self) -> bool {
        self.desired_stop
            || matches!(
                self.client_status,
                AllocClientStatus::Complete | AllocClientStatus::Failed | AllocClientStatus::Lost
            )
    }
}

/// Read-only view of a client node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "ID")]
    pub id: SmolStr,
    #[serde(default)]
    pub node_pool: SmolStr,
    #[serde(default)]
    pub status: SmolStr,
}
