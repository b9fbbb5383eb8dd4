use std::collections::HashMap;

use crate::error::AclError;
use crate::fsm::LogEntry;
use crate::state::paginator::{self, SortKey};
use crate::state::{Snapshot, TableId};
use crate::types::{AuthMethod, AuthMethodType, Policy};

use super::blocking::blocking_query;
use super::message::*;
use super::{apply_filter, AclEndpoint};

impl AclEndpoint {
    /// `ACL.UpsertAuthMethods`: management only. At most one default
    /// method per type; content hash recomputed on write.
    pub async fn upsert_auth_methods(&self, req: &UpsertAuthMethodsRequest) -> Result<UpsertAuthMethodsResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.methods.is_empty() {
            return Err(AclError::validation("must specify at least one auth method"));
        }

        let snapshot = self.store().snapshot();
        let mut methods = Vec::with_capacity(req.methods.len());
        for method in &req.methods {
            let mut method = method.clone();
            validate_auth_method(&snapshot, &method)?;
            method.create_index = snapshot.auth_method(&method.name).map_or(0, |existing| existing.create_index);
            method.set_hash();
            methods.push(method);
        }

        let applied = self.submit(LogEntry::AuthMethodUpsert { methods: methods.clone() }).await?;
        for method in &mut methods {
            method.modify_index = applied.index;
            if method.create_index == 0 {
                method.create_index = applied.index;
            }
        }

        Ok(UpsertAuthMethodsResponse {
            methods,
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.DeleteAuthMethods`: management only; strict.
    pub async fn delete_auth_methods(&self, req: &DeleteAuthMethodsRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.names.is_empty() {
            return Err(AclError::validation("must specify at least one auth method"));
        }

        let snapshot = self.store().snapshot();
        for name in &req.names {
            if snapshot.auth_method(name).is_none() {
                return Err(AclError::not_found(format!("auth method {name}")));
            }
        }

        let applied = self.submit(LogEntry::AuthMethodDelete { names: req.names.clone() }).await?;
        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.ListAuthMethods`: management only.
    pub async fn list_auth_methods(&self, req: &ListAuthMethodsRequest) -> Result<ListAuthMethodsResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let prefix = req.opts.prefix.clone();
        let cursor = match &req.opts.next_token {
            Some(token) => Some(SortKey::parse(token, false)?),
            None => None,
        };
        let per_page = req.opts.per_page;
        let reverse = req.opts.reverse;

        let ((methods, next_token), index) =
            blocking_query(self.store(), &req.opts, &[TableId::AuthMethods], move |snapshot| {
                let mut entries: Vec<(SortKey, AuthMethodStub)> = snapshot
                    .auth_methods()
                    .filter(|method| method.name.starts_with(prefix.as_str()))
                    .map(|method| (SortKey::Id(method.name.clone()), AuthMethodStub::from(&**method)))
                    .collect();
                if reverse {
                    entries.reverse();
                }
                let page = paginator::paginate(entries.into_iter(), cursor.as_ref(), per_page, reverse);
                Ok((page.items, page.next_token))
            })
            .await?;

        let methods = apply_filter(req.opts.filter.as_deref(), methods)?;

        Ok(ListAuthMethodsResponse {
            methods,
            meta: QueryMeta { index, next_token },
        })
    }

    /// `ACL.GetAuthMethod`: management only.
    pub async fn get_auth_method(&self, req: &GetAuthMethodRequest) -> Result<GetAuthMethodResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let name = req.name.clone();
        let (method, index) = blocking_query(self.store(), &req.opts, &[TableId::AuthMethods], move |snapshot| {
            Ok(snapshot.auth_method(&name).map(|method| (*method).clone()))
        })
        .await?;

        Ok(GetAuthMethodResponse {
            method,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.GetAuthMethods`: management only.
    pub async fn get_auth_methods(&self, req: &GetAuthMethodsRequest) -> Result<GetAuthMethodsResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let names = req.names.clone();
        let (methods, index) = blocking_query(self.store(), &req.opts, &[TableId::AuthMethods], move |snapshot| {
            let mut found = HashMap::new();
            for name in &names {
                if let Some(method) = snapshot.auth_method(name) {
                    found.insert(name.clone(), (*method).clone());
                }
            }
            Ok(found)
        })
        .await?;

        Ok(GetAuthMethodsResponse {
            methods,
            meta: QueryMeta { index, next_token: None },
        })
    }
}

fn validate_auth_method(snapshot: &Snapshot, method: &AuthMethod) -> Result<(), AclError> {
    if !Policy::valid_name(&method.name) {
        return Err(AclError::validation(format!("invalid auth method name {:?}", method.name)));
    }
    if method.max_token_ttl_secs == 0 {
        return Err(AclError::validation("max token TTL must be set"));
    }
    if method.method_type == AuthMethodType::Jwt && method.config.jwt_validation_pub_keys.is_empty() {
        return Err(AclError::validation("JWT auth method requires validation public keys"));
    }
    if method.default {
        let conflicting = snapshot
            .auth_methods()
            .find(|existing| existing.default && existing.method_type == method.method_type && existing.name != method.name);
        if let Some(existing) = conflicting {
            return Err(AclError::conflict(format!(
                "default auth method for type {} already exists: {}",
                method.method_type, existing.name
            )));
        }
    }
    Ok(())
}
