use std::collections::HashMap;

use smol_str::SmolStr;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::bootstrap;
use crate::error::AclError;
use crate::fsm::LogEntry;
use crate::state::paginator::{self, SortKey};
use crate::state::{Snapshot, TableId};
use crate::types::{RoleLink, Token, TokenType};

use super::blocking::blocking_query;
use super::message::*;
use super::{apply_filter, AclEndpoint};

impl AclEndpoint {
    /// `ACL.GetToken`: management, or the token's own secret.
    pub async fn get_token(&self, req: &GetTokenRequest) -> Result<GetTokenResponse, AclError> {
        let capability = self.authenticate(&req.opts.auth_token)?;
        if !capability.is_management() {
            let snapshot = self.store().snapshot();
            let caller = self.caller_token(&snapshot, &req.opts.auth_token)?;
            if caller.accessor_id != req.accessor_id {
                return Err(AclError::PermissionDenied);
            }
        }

        let accessor_id = req.accessor_id.clone();
        let (token, index) = blocking_query(self.store(), &req.opts, &[TableId::Tokens], move |snapshot| {
            Ok(snapshot.token_by_accessor(&accessor_id).map(|token| redacted(&token)))
        })
        .await?;

        Ok(GetTokenResponse {
            token,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.GetTokens`: management only.
    pub async fn get_tokens(&self, req: &GetTokensRequest) -> Result<GetTokensResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let accessor_ids = req.accessor_ids.clone();
        let (tokens, index) = blocking_query(self.store(), &req.opts, &[TableId::Tokens], move |snapshot| {
            let mut found = HashMap::new();
            for accessor_id in &accessor_ids {
                if let Some(token) = snapshot.token_by_accessor(accessor_id) {
                    found.insert(accessor_id.clone(), redacted(&token));
                }
            }
            Ok(found)
        })
        .await?;

        Ok(GetTokensResponse {
            tokens,
            meta: QueryMeta { index, next_token: None },
        })
    }

    /// `ACL.ListTokens`: management only. Canonical (create index,
    /// accessor) order, or accessor order under a prefix; supports
    /// `GlobalOnly`, filtering and reverse.
    pub async fn list_tokens(&self, req: &ListTokensRequest) -> Result<ListTokensResponse, AclError> {
        self.require_management(&req.opts.auth_token)?;

        let prefix = req.opts.prefix.clone();
        let canonical = prefix.is_empty();
        let cursor = match &req.opts.next_token {
            Some(token) => Some(SortKey::parse(token, canonical)?),
            None => None,
        };
        let per_page = req.opts.per_page;
        let reverse = req.opts.reverse;
        let global_only = req.global_only;

        let ((stubs, next_token), index) = blocking_query(self.store(), &req.opts, &[TableId::Tokens], move |snapshot| {
            let mut entries: Vec<(SortKey, TokenStub)> = if canonical {
                snapshot
                    .tokens()
                    .filter(|(_, token)| !global_only || token.global)
                    .map(|(create_index, token)| {
                        (
                            SortKey::CreateIndex(create_index, token.accessor_id.clone()),
                            TokenStub::from(&*token),
                        )
                    })
                    .collect()
            } else {
                snapshot
                    .tokens_by_accessor_prefix(&prefix)
                    .filter(|token| !global_only || token.global)
                    .map(|token| (SortKey::Id(token.accessor_id.clone()), TokenStub::from(&**token)))
                    .collect()
            };
            if reverse {
                entries.reverse();
            }
            let page = paginator::paginate(entries.into_iter(), cursor.as_ref(), per_page, reverse);
            Ok((page.items, page.next_token))
        })
        .await?;

        let stubs = apply_filter(req.opts.filter.as_deref(), stubs)?;

        Ok(ListTokensResponse {
            tokens: stubs,
            meta: QueryMeta { index, next_token },
        })
    }

    /// `ACL.UpsertTokens`: management only. Creation assigns accessor and
    /// secret; the reply is the only place a fresh secret is ever returned.
    pub async fn upsert_tokens(&self, req: &UpsertTokensRequest) -> Result<UpsertTokensResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.tokens.is_empty() {
            return Err(AclError::validation("must specify at least one token"));
        }

        let snapshot = self.store().snapshot();
        let now = OffsetDateTime::now_utc();
        let conf = self.conf_image();

        let mut canonical = Vec::with_capacity(req.tokens.len());
        let mut created = Vec::with_capacity(req.tokens.len());
        for input in &req.tokens {
            let (token, is_create) = canonicalize_token(
                &snapshot,
                input,
                now,
                conf.acl.token_min_expiration_ttl,
                conf.acl.token_max_expiration_ttl,
            )?;
            created.push(is_create);
            canonical.push(token);
        }

        let applied = self.submit(LogEntry::TokenUpsert { tokens: canonical.clone() }).await?;

        // Echo canonicalized tokens; secrets only for creations.
        let tokens = canonical
            .into_iter()
            .zip(created)
            .map(|(mut token, is_create)| {
                token.modify_index = applied.index;
                if token.create_index == 0 {
                    token.create_index = applied.index;
                }
                if !is_create {
                    token.secret_id = SmolStr::default();
                }
                token
            })
            .collect();

        Ok(UpsertTokensResponse {
            tokens,
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.DeleteTokens`: management only, all-or-nothing.
    pub async fn delete_tokens(&self, req: &DeleteTokensRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        if req.accessor_ids.is_empty() {
            return Err(AclError::validation("must specify at least one token"));
        }

        let snapshot = self.store().snapshot();
        let missing: Vec<&str> = req
            .accessor_ids
            .iter()
            .filter(|accessor_id| snapshot.token_by_accessor(accessor_id).is_none())
            .map(|accessor_id| accessor_id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AclError::validation(format!(
                "Cannot delete nonexistent tokens: {}",
                missing.join(", ")
            )));
        }

        let applied = self
            .submit(LogEntry::TokenDelete {
                accessors: req.accessor_ids.clone(),
            })
            .await?;
        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.Bootstrap`: unauthenticated, single-shot per cluster
    /// incarnation, re-armed through the reset file.
    pub async fn bootstrap(&self, req: &BootstrapRequest) -> Result<BootstrapResponse, AclError> {
        let snapshot = self.store().snapshot();
        let watermark = snapshot.bootstrap_index();

        if watermark != 0 {
            let conf = self.conf_image();
            match bootstrap::read_reset_index(&conf.data_dir) {
                Some(reset_index) if reset_index == watermark => {
                    info!(watermark, "ACL bootstrap reset authorized by reset file");
                }
                _ => {
                    return Err(AclError::validation(format!(
                        "ACL bootstrap already done (reset index: {watermark})"
                    )));
                }
            }
        }

        let token = bootstrap::make_bootstrap_token(req.bootstrap_secret.clone(), OffsetDateTime::now_utc());
        let applied = self
            .submit(LogEntry::TokenBootstrap {
                token: token.clone(),
                reset_index: watermark,
            })
            .await?;

        let token = self
            .store()
            .snapshot()
            .token_by_accessor(&token.accessor_id)
            .map(|stored| (*stored).clone())
            .unwrap_or(token);

        Ok(BootstrapResponse {
            token,
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.ResolveToken`: returns the record for a presented secret with
    /// no capability compilation. Unauthenticated by construction: knowing
    /// the secret is the authentication.
    pub async fn resolve_token(&self, req: &ResolveTokenRequest) -> Result<ResolveTokenResponse, AclError> {
        let secret_id = req.secret_id.clone();
        let (token, index) = blocking_query(self.store(), &req.opts, &[TableId::Tokens], move |snapshot| {
            if secret_id.is_empty() {
                return Ok(Token::anonymous());
            }
            crate::resolver::token_for_secret(snapshot, &secret_id, OffsetDateTime::now_utc())
                .map(|token| (*token).clone())
                .map_err(Into::into)
        })
        .await?;

        Ok(ResolveTokenResponse {
            token,
            meta: QueryMeta { index, next_token: None },
        })
    }

    fn conf_image(&self) -> std::sync::Arc<crate::config::Conf> {
        self.conf_handle().get_conf()
    }
}

/// A read-side copy with the secret cleared; secrets are shown once, at
/// creation.
fn redacted(token: &Token) -> Token {
    let mut token = token.clone();
    token.secret_id = SmolStr::default();
    token
}

fn canonicalize_token(
    snapshot: &Snapshot,
    input: &TokenInput,
    now: OffsetDateTime,
    min_ttl: Duration,
    max_ttl: Duration,
) -> Result<(Token, bool), AclError> {
    let token_type = match input.token_type.as_str() {
        "client" => TokenType::Client,
        "management" => TokenType::Management,
        _ => return Err(AclError::validation("token type must be client or management")),
    };

    if token_type == TokenType::Management && (!input.policies.is_empty() || !input.roles.is_empty()) {
        return Err(AclError::validation(
            "management tokens cannot be associated with policies or roles",
        ));
    }

    if input.expiration_time.is_some() && input.expiration_ttl_secs.is_some() {
        return Err(AclError::validation(
            "token expiration time and expiration TTL are mutually exclusive",
        ));
    }

    // Role references resolve by id or name and canonicalize to {id, name},
    // deduplicated. Policies may dangle; roles may not.
    let mut roles: Vec<RoleLink> = Vec::with_capacity(input.roles.len());
    for link in &input.roles {
        let role = if !link.id.is_empty() {
            snapshot.role(&link.id)
        } else {
            snapshot.role_by_name(&link.name)
        };
        let Some(role) = role else {
            let wanted = if link.id.is_empty() { &link.name } else { &link.id };
            return Err(AclError::validation(format!("cannot find role {wanted}")));
        };
        if !roles.iter().any(|existing| existing.id == role.id) {
            roles.push(RoleLink {
                id: role.id.clone(),
                name: role.name.clone(),
            });
        }
    }

    let is_create = input.accessor_id.is_empty();

    let mut token = if is_create {
        let mut token = Token::new_client(input.name.clone(), input.policies.clone(), roles);
        if !input.secret_id.is_empty() {
            token.secret_id = input.secret_id.clone();
        }
        token.create_time = now;
        token
    } else {
        let existing = snapshot
            .token_by_accessor(&input.accessor_id)
            .ok_or_else(|| AclError::not_found(format!("token {}", input.accessor_id)))?;
        if input.modify_index != 0 && input.modify_index != existing.modify_index {
            return Err(AclError::conflict(format!(
                "token modify index mismatch (given {}, stored {})",
                input.modify_index, existing.modify_index
            )));
        }
        let mut token = (*existing).clone();
        token.name = input.name.clone();
        token.policies = input.policies.clone();
        token.roles = roles;
        if !input.secret_id.is_empty() {
            token.secret_id = input.secret_id.clone();
        }
        token
    };

    token.token_type = token_type;
    token.global = input.global;

    match input.expiration_ttl_secs {
        Some(ttl_secs) => {
            let ttl = Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
            if ttl < min_ttl {
                return Err(AclError::validation(format!(
                    "token expiration TTL is below the allowed minimum ({min_ttl})"
                )));
            }
            if ttl > max_ttl {
                return Err(AclError::validation(format!(
                    "token expiration TTL is above the allowed maximum ({max_ttl})"
                )));
            }
            token.expiration_ttl_secs = Some(ttl_secs);
            token.expiration_time = Some(token.create_time + ttl);
        }
        None => {
            if let Some(expiration_time) = input.expiration_time {
                token.expiration_time = Some(expiration_time);
            }
        }
    }

    token.set_hash();
    Ok((token, is_create))
}

#[cfg(test)]
mod tests {
    use crate::state::StateStore;
    use crate::types::{PolicyLink, Role};

    use super::*;

    const MIN_TTL: Duration = Duration::minutes(1);
    const MAX_TTL: Duration = Duration::hours(24);

    fn input(token_type: &str) -> TokenInput {
        TokenInput {
            token_type: SmolStr::new(token_type),
            ..TokenInput::default()
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let snapshot = StateStore::new().snapshot();
        let err = canonicalize_token(&snapshot, &input("admin"), OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL)
            .expect_err("bad type");
        assert!(err.to_string().contains("token type must be client or management"));
    }

    #[test]
    fn create_assigns_accessor_and_secret() {
        let snapshot = StateStore::new().snapshot();
        let (token, is_create) =
            canonicalize_token(&snapshot, &input("client"), OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL)
                .expect("valid input");
        assert!(is_create);
        assert!(!token.accessor_id.is_empty());
        assert!(!token.secret_id.is_empty());
    }

    #[test]
    fn role_references_canonicalize_and_dedup() {
        let store = StateStore::new();
        store.upsert_roles(2, vec![Role::new("ops", vec![PolicyLink::new("p")])]);
        let snapshot = store.snapshot();
        let role = snapshot.role_by_name("ops").expect("role exists");

        let mut request = input("client");
        request.roles = vec![RoleLink::by_name("ops"), RoleLink::by_id(role.id.clone())];
        let (token, _) = canonicalize_token(&snapshot, &request, OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL)
            .expect("valid input");
        assert_eq!(token.roles.len(), 1);
        assert_eq!(token.roles[0].id, role.id);
        assert_eq!(token.roles[0].name, "ops");
    }

    #[test]
    fn missing_role_is_an_error() {
        let snapshot = StateStore::new().snapshot();
        let mut request = input("client");
        request.roles = vec![RoleLink::by_name("ghost")];
        let err = canonicalize_token(&snapshot, &request, OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL)
            .expect_err("unknown role");
        assert!(err.to_string().contains("cannot find role ghost"));
    }

    #[test]
    fn dangling_policies_are_allowed() {
        let snapshot = StateStore::new().snapshot();
        let mut request = input("client");
        request.policies = vec![SmolStr::new("not-yet-created")];
        canonicalize_token(&snapshot, &request, OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL).expect("valid input");
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let snapshot = StateStore::new().snapshot();
        let now = OffsetDateTime::now_utc();

        let mut request = input("client");
        request.expiration_ttl_secs = Some(10);
        assert!(canonicalize_token(&snapshot, &request, now, MIN_TTL, MAX_TTL).is_err());

        request.expiration_ttl_secs = Some(60 * 60 * 48);
        assert!(canonicalize_token(&snapshot, &request, now, MIN_TTL, MAX_TTL).is_err());

        request.expiration_ttl_secs = Some(600);
        let (token, _) = canonicalize_token(&snapshot, &request, now, MIN_TTL, MAX_TTL).expect("valid ttl");
        assert_eq!(token.expiration_time, Some(now + Duration::seconds(600)));
    }

    #[test]
    fn management_tokens_cannot_carry_references() {
        let snapshot = StateStore::new().snapshot();
        let mut request = input("management");
        request.policies = vec![SmolStr::new("p")];
        assert!(canonicalize_token(&snapshot, &request, OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL).is_err());
    }

    #[test]
    fn update_requires_existing_accessor() {
        let snapshot = StateStore::new().snapshot();
        let mut request = input("client");
        request.accessor_id = SmolStr::new("missing");
        assert!(canonicalize_token(&snapshot, &request, OffsetDateTime::now_utc(), MIN_TTL, MAX_TTL).is_err());
    }
}
