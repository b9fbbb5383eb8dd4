use std::collections::{BTreeSet, HashMap};

use smol_str::SmolStr;
use uuid::Uuid;

use crate::error::AclError;
use crate::fsm::LogEntry;
use crate::state::paginator::{self, SortKey};
use crate::state::{Snapshot, TableId};
use crate::types::{Policy, Role};

use super::blocking::blocking_query;
use super::message::*;
use super::{apply_filter, AclEndpoint};

impl AclEndpoint {
    /// `ACL.UpsertRoles`: management only. Role policy references are
    /// strict, unlike token policy references.
    pub async fn upsert_roles(&self, req: &UpsertRolesRequest) -> Result<UpsertRolesResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.roles.is_empty() {
            return Err(AclError::validation("must specify at least one role"));
        }

        let snapshot = self.store().snapshot();
        let mut roles = Vec::with_capacity(req.roles.len());
        for role in &req.roles {
            let mut role = role.clone();
            validate_role(&snapshot, &role)?;
            if role.id.is_empty() {
                role.id = SmolStr::new(Uuid::new_v4().to_string());
                role.create_index = 0;
            } else {
                match snapshot.role(&role.id) {
                    Some(existing) => role.create_index = existing.create_index,
                    None => return Err(AclError::not_found(format!("role {}", role.id))),
                }
            }
            role.set_hash();
            roles.push(role);
        }

        let applied = self.submit(LogEntry::RoleUpsert { roles: roles.clone() }).await?;
        for role in &mut roles {
            role.modify_index = applied.index;
            if role.create_index == 0 {
                role.create_index = applied.index;
            }
        }

        Ok(UpsertRolesResponse {
            roles,
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.DeleteRolesByID`: management only; strict.
    pub async fn delete_roles_by_id(&self, req: &DeleteRolesByIdRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.role_ids.is_empty() {
            return Err(AclError::validation("must specify at least one role"));
        }

        let snapshot = self.store().snapshot();
        for role_id in &req.role_ids {
            if snapshot.role(role_id).is_none() {
                return Err(AclError::not_found(format!("role {role_id}")));
            }
        }

        let applied = self.submit(LogEntry::RoleDelete { ids: req.role_ids.clone() }).await?;
        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.ListRoles`: management sees all roles, other callers the roles
    /// their token links.
    pub async fn list_roles(&self, req: &ListRolesRequest) -> Result<ListRolesResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        let visible = self.visible_role_ids(&capability, &req.opts.auth_token)?;

        let prefix = req.opts.prefix.clone();
        let cursor = match &req.opts.next_token {
            Some(token) => Some(SortKey::parse(token, false)?),
            None => None,
        };
        let per_page = req.opts.per_page;
        let reverse = req.opts.reverse;

        let ((roles, next_token), index) = blocking_query(self.store(), &req.opts, &[TableId::Roles], move |snapshot| {
            let visible = visible.as_ref();
            let mut entries: Vec<(SortKey, Role)> = if prefix.is_empty() {
                snapshot
                    .roles()
                    .filter(|role| visible.is_none_or(|visible| visible.contains(role.id.as_str())))
                    .map(|role| (SortKey::Id(role.id.clone()), (**role).clone()))
                    .collect()
            } else {
                // A name prefix narrows the scan and switches to name order.
                snapshot
                    .roles_by_name_prefix(&prefix)
                    .filter(|role| visible.is_none_or(|visible| visible.contains(role.id.as_str())))
                    .map(|role| (SortKey::Id(role.name.clone()), (*role).clone()))
                    .collect()
            };
            if reverse {
                entries.reverse();
            }
            let page = paginator::paginate(entries.into_iter(), cursor.as_ref(), per_page, reverse);
            Ok((page.items, page.next_token))
        })
        .await?;

        let roles = apply_filter(req.opts.filter.as_deref(), roles)?;

        Ok(ListRolesResponse {
            roles,
            meta: QueryMeta { index, next_token },
        })
    }

    /// `ACL.GetRolesByID`: management or linked roles only.
    pub async fn get_roles_by_id(&self, req: &GetRolesByIdRequest) -> Result<GetRolesByIdResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        let visible = self.visible_role_ids(&capability, &req.opts.auth_token)?;
        if let Some(visible) = &visible {
            if req.role_ids.iter().any(|role_id| !visible.contains(role_id.as_str())) {
                return Err(AclError::PermissionDenied);
            }
        }

        let role_ids = req.role_ids.clone();
        let (roles, index) = blocking_query(self.store(), &req.opts, &[TableId::Roles], move |snapshot| {
            let mut found = HashMap::new();
            for role_id in &role_ids {
                if let Some(role) = snapshot.role(role_id) {
                    found.insert(role_id.clone(), (*role).clone());
                }
            }
            Ok(found)
        })
        .await?;

        Ok(GetRolesByIdResponse {
            roles,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.GetRoleByID`: management or a token linking the role.
    pub async fn get_role_by_id(&self, req: &GetRoleByIdRequest) -> Result<GetRoleResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        let visible = self.visible_role_ids(&capability, &req.opts.auth_token)?;
        if let Some(visible) = &visible {
            if !visible.contains(req.role_id.as_str()) {
                return Err(AclError::PermissionDenied);
            }
        }

        let role_id = req.role_id.clone();
        let (role, index) = blocking_query(self.store(), &req.opts, &[TableId::Roles], move |snapshot| {
            Ok(snapshot.role(&role_id).map(|role| (*role).clone()))
        })
        .await?;

        Ok(GetRoleResponse {
            role,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.GetRoleByName`: management or a token linking the role.
    pub async fn get_role_by_name(&self, req: &GetRoleByNameRequest) -> Result<GetRoleResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        let visible = self.visible_role_ids(&capability, &req.opts.auth_token)?;
        if let Some(visible) = &visible {
            let resolved = self.store().snapshot().role_by_name(&req.role_name);
            match resolved {
                Some(role) if visible.contains(role.id.as_str()) => {}
                _ => return Err(AclError::PermissionDenied),
            }
        }

        let role_name = req.role_name.clone();
        let (role, index) = blocking_query(self.store(), &req.opts, &[TableId::Roles], move |snapshot| {
            Ok(snapshot.role_by_name(&role_name).map(|role| (*role).clone()))
        })
        .await?;

        Ok(GetRoleResponse {
            role,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `None` for management (sees everything); otherwise the role ids the
    /// caller's token links.
    fn visible_role_ids(
        &self,
        capability: &crate::capability::Capability,
        secret: &str,
    ) -> Result<Option<BTreeSet<SmolStr>>, AclError> {
        if capability.is_management() {
            return Ok(None);
        }
        let snapshot = self.store().snapshot();
        let token = self.caller_token(&snapshot, secret)?;
        Ok(Some(token.roles.iter().map(|link| link.id.clone()).collect()))
    }
}

fn validate_role(snapshot: &Snapshot, role: &Role) -> Result<(), AclError> {
    if !Policy::valid_name(&role.name) {
        return Err(AclError::validation(format!("invalid role name {:?}", role.name)));
    }
    for name in role.policy_names() {
        if snapshot.policy(name).is_none() {
            return Err(AclError::validation(format!("cannot find policy {name}")));
        }
    }
    if let Some(existing) = snapshot.role_by_name(&role.name) {
        if existing.id != role.id {
            return Err(AclError::conflict(format!("role with name {} already exists", role.name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::state::StateStore;
    use crate::types::PolicyLink;

    use super::*;

    #[test]
    fn role_policy_references_are_strict() {
        let snapshot = StateStore::new().snapshot();
        let role = Role::new("ops", vec![PolicyLink::new("ghost")]);
        let err = validate_role(&snapshot, &role).expect_err("missing policy");
        assert!(err.to_string().contains("cannot find policy ghost"));
    }

    #[test]
    fn duplicate_names_conflict() {
        let store = StateStore::new();
        store.upsert_policies(2, vec![Policy::new("p", "[node]\npolicy = \"read\"\n")]);
        store.upsert_roles(3, vec![Role::new("ops", vec![PolicyLink::new("p")])]);

        let snapshot = store.snapshot();
        let duplicate = Role::new("ops", vec![PolicyLink::new("p")]);
        let err = validate_role(&snapshot, &duplicate).expect_err("name is taken");
        assert!(err.to_string().contains("role with name ops already exists"));

        // Same id (an update) is not a conflict.
        let existing = snapshot.role_by_name("ops").expect("role exists");
        let mut update = (*existing).clone();
        update.description = "updated".to_owned();
        validate_role(&snapshot, &update).expect("update passes");
    }
}
