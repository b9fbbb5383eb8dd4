use std::collections::{BTreeSet, HashMap};

use smol_str::SmolStr;

use crate::error::AclError;
use crate::fsm::LogEntry;
use crate::rules;
use crate::state::paginator::{self, SortKey};
use crate::state::TableId;
use crate::types::Policy;

use super::blocking::blocking_query;
use super::message::*;
use super::{effective_policy_names, apply_filter, AclEndpoint};

impl AclEndpoint {
    /// `ACL.GetPolicy`: readable with management or a token referencing
    /// the policy, directly or through a role.
    pub async fn get_policy(&self, req: &GetPolicyRequest) -> Result<GetPolicyResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        if !capability.is_management() {
            let snapshot = self.store().snapshot();
            let token = self.caller_token(&snapshot, &req.opts.auth_token)?;
            if !effective_policy_names(&snapshot, &token).contains(req.name.as_str()) {
                return Err(AclError::PermissionDenied);
            }
        }

        let name = req.name.clone();
        let (policy, index) = blocking_query(self.store(), &req.opts, &[TableId::Policies], move |snapshot| {
            Ok(snapshot.policy(&name).map(|policy| (*policy).clone()))
        })
        .await?;

        Ok(GetPolicyResponse {
            policy,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.GetPolicies`: the caller must speak for every requested name.
    pub async fn get_policies(&self, req: &GetPoliciesRequest) -> Result<GetPoliciesResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        if !capability.is_management() {
            let snapshot = self.store().snapshot();
            let token = self.caller_token(&snapshot, &req.opts.auth_token)?;
            let effective = effective_policy_names(&snapshot, &token);
            if req.names.iter().any(|name| !effective.contains(name.as_str())) {
                return Err(AclError::PermissionDenied);
            }
        }

        let names = req.names.clone();
        let (policies, index) = blocking_query(self.store(), &req.opts, &[TableId::Policies], move |snapshot| {
            let mut found = HashMap::new();
            for name in &names {
                if let Some(policy) = snapshot.policy(name) {
                    found.insert(name.clone(), (*policy).clone());
                }
            }
            Ok(found)
        })
        .await?;

        Ok(GetPoliciesResponse {
            policies,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.ListPolicies`: management sees everything; other callers see
    /// the policies their token speaks for. Unauthenticated callers see the
    /// anonymous policy when it exists.
    pub async fn list_policies(&self, req: &ListPoliciesRequest) -> Result<ListPoliciesResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;

        let visible: Option<BTreeSet<SmolStr>> = if capability.is_management() {
            None
        } else {
            let snapshot = self.store().snapshot();
            let token = self.caller_token(&snapshot, &req.opts.auth_token)?;
            Some(effective_policy_names(&snapshot, &token))
        };

        let prefix = req.opts.prefix.clone();
        let cursor = match &req.opts.next_token {
            Some(token) => Some(SortKey::parse(token, false)?),
            None => None,
        };
        let per_page = req.opts.per_page;
        let reverse = req.opts.reverse;

        let ((stubs, next_token), index) =
            blocking_query(self.store(), &req.opts, &[TableId::Policies], move |snapshot| {
                let mut entries: Vec<(SortKey, PolicyStub)> = snapshot
                    .policies_by_prefix(&prefix)
                    .filter(|policy| {
                        visible
                            .as_ref()
                            .is_none_or(|visible| visible.contains(policy.name.as_str()))
                    })
                    .map(|policy| (SortKey::Id(policy.name.clone()), PolicyStub::from(&**policy)))
                    .collect();
                if reverse {
                    entries.reverse();
                }
                let page = paginator::paginate(entries.into_iter(), cursor.as_ref(), per_page, reverse);
                Ok((page.items, page.next_token))
            })
            .await?;

        let stubs = apply_filter(req.opts.filter.as_deref(), stubs)?;

        Ok(ListPoliciesResponse {
            policies: stubs,
            meta: QueryMeta { index, next_token },
        })
    }

    /// `ACL.UpsertPolicies`: management only.
    pub async fn upsert_policies(&self, req: &UpsertPoliciesRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.policies.is_empty() {
            return Err(AclError::validation("must specify at least one policy"));
        }

        let mut policies = Vec::with_capacity(req.policies.len());
        for policy in &req.policies {
            let mut policy = policy.clone();
            validate_policy(&policy)?;
            policy.set_hash();
            policies.push(policy);
        }

        let applied = self.submit(LogEntry::PolicyUpsert { policies }).await?;
        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.DeletePolicies`: management only; strict.
    pub async fn delete_policies(&self, req: &DeletePoliciesRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.names.is_empty() {
            return Err(AclError::validation("must specify at least one policy"));
        }

        let snapshot = self.store().snapshot();
        for name in &req.names {
            if snapshot.policy(name).is_none() {
                return Err(AclError::not_found(format!("policy {name:?}")));
            }
        }

        let applied = self.submit(LogEntry::PolicyDelete { names: req.names.clone() }).await?;
        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }
}

fn validate_policy(policy: &Policy) -> Result<(), AclError> {
    if !Policy::valid_name(&policy.name) {
        return Err(AclError::validation(format!("invalid policy name {:?}", policy.name)));
    }
    rules::parse_rules(&policy.rules).map_err(|error| AclError::validation(error.to_string()))?;
    if let Some(grant) = &policy.job_grant {
        if grant.job_id.is_empty() {
            return Err(AclError::validation("job grant requires a job ID"));
        }
        if !grant.task.is_empty() && grant.group.is_empty() {
            return Err(AclError::validation("job grant with a task requires a group"));
        }
    }
    Ok(())
}
