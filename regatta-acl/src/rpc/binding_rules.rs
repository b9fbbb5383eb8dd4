use std::collections::HashMap;

use smol_str::SmolStr;
use uuid::Uuid;

use crate::error::AclError;
use crate::fsm::LogEntry;
use crate::selector::Expression;
use crate::state::paginator::{self, SortKey};
use crate::state::{Snapshot, TableId};
use crate::types::BindingRule;

use super::blocking::blocking_query;
use super::message::*;
use super::{apply_filter, AclEndpoint};

impl AclEndpoint {
    /// `ACL.UpsertBindingRules`: management only.
    pub async fn upsert_binding_rules(&self, req: &UpsertBindingRulesRequest) -> Result<UpsertBindingRulesResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.rules.is_empty() {
            return Err(AclError::validation("must specify at least one binding rule"));
        }

        let snapshot = self.store().snapshot();
        let mut rules = Vec::with_capacity(req.rules.len());
        for rule in &req.rules {
            let mut rule = rule.clone();
            validate_binding_rule(&snapshot, &rule)?;
            if rule.id.is_empty() {
                rule.id = SmolStr::new(Uuid::new_v4().to_string());
                rule.create_index = 0;
            } else {
                match snapshot.binding_rule(&rule.id) {
                    Some(existing) => rule.create_index = existing.create_index,
                    None => return Err(AclError::not_found(format!("binding rule {}", rule.id))),
                }
            }
            rules.push(rule);
        }

        let applied = self.submit(LogEntry::BindingRuleUpsert { rules: rules.clone() }).await?;
        for rule in &mut rules {
            rule.modify_index = applied.index;
            if rule.create_index == 0 {
                rule.create_index = applied.index;
            }
        }

        Ok(UpsertBindingRulesResponse {
            rules,
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.DeleteBindingRules`: management only; strict.
    pub async fn delete_binding_rules(&self, req: &DeleteBindingRulesRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.rule_ids.is_empty() {
            return Err(AclError::validation("must specify at least one binding rule"));
        }

        let snapshot = self.store().snapshot();
        for rule_id in &req.rule_ids {
            if snapshot.binding_rule(rule_id).is_none() {
                return Err(AclError::not_found(format!("binding rule {rule_id}")));
            }
        }

        let applied = self.submit(LogEntry::BindingRuleDelete { ids: req.rule_ids.clone() }).await?;
        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.ListBindingRules`: management only.
    pub async fn list_binding_rules(&self, req: &ListBindingRulesRequest) -> Result<ListBindingRulesResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let cursor = match &req.opts.next_token {
            Some(token) => Some(SortKey::parse(token, false)?),
            None => None,
        };
        let per_page = req.opts.per_page;
        let reverse = req.opts.reverse;

        let ((rules, next_token), index) =
            blocking_query(self.store(), &req.opts, &[TableId::BindingRules], move |snapshot| {
                let mut entries: Vec<(SortKey, BindingRuleStub)> = snapshot
                    .binding_rules()
                    .map(|rule| (SortKey::Id(rule.id.clone()), BindingRuleStub::from(&**rule)))
                    .collect();
                if reverse {
                    entries.reverse();
                }
                let page = paginator::paginate(entries.into_iter(), cursor.as_ref(), per_page, reverse);
                Ok((page.items, page.next_token))
            })
            .await?;

        let rules = apply_filter(req.opts.filter.as_deref(), rules)?;

        Ok(ListBindingRulesResponse {
            rules,
            meta: QueryMeta { index, next_token },
        })
    }

    /// `ACL.GetBindingRules`: management only.
    pub async fn get_binding_rules(&self, req: &GetBindingRulesRequest) -> Result<GetBindingRulesResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let rule_ids = req.rule_ids.clone();
        let (rules, index) = blocking_query(self.store(), &req.opts, &[TableId::BindingRules], move |snapshot| {
            let mut found = HashMap::new();
            for rule_id in &rule_ids {
                if let Some(rule) = snapshot.binding_rule(rule_id) {
                    found.insert(rule_id.clone(), (*rule).clone());
                }
            }
            Ok(found)
        })
        .await?;

        Ok(GetBindingRulesResponse {
            rules,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.GetBindingRule`: management only.
    pub async fn get_binding_rule(&self, req: &GetBindingRuleRequest) -> Result<GetBindingRuleResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let rule_id = req.rule_id.clone();
        let (rule, index) = blocking_query(self.store(), &req.opts, &[TableId::BindingRules], move |snapshot| {
            Ok(snapshot.binding_rule(&rule_id).map(|rule| (*rule).clone()))
        })
        .await?;

        Ok(GetBindingRuleResponse {
            rule,
            meta: QueryMeta { index, next_token: None },
        })
    }
}

fn validate_binding_rule(snapshot: &Snapshot, rule: &BindingRule) -> Result<(), AclError> {
    if snapshot.auth_method(&rule.auth_method).is_none() {
        return Err(AclError::validation(format!("ACL auth method {} not found", rule.auth_method)));
    }
    if rule.bind_type.is_empty() {
        return Err(AclError::validation("bind type is missing"));
    }
    let Some(bind_type) = rule.parsed_bind_type() else {
        return Err(AclError::validation(format!("unsupported bind type: {}", rule.bind_type)));
    };
    if bind_type != crate::types::BindType::Management && rule.bind_name.is_empty() {
        return Err(AclError::validation("bind name is missing"));
    }
    if !rule.selector.is_empty() {
        Expression::parse(&rule.selector)
            .map_err(|error| AclError::validation(format!("selector is invalid: {error}")))?;
    }
    Ok(())
}
