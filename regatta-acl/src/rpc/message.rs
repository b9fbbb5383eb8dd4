//! Request and response shapes for the `ACL` RPC namespace.
//!
//! The transport and codec live outside this crate; everything here is
//! plain serde data. Read requests embed [`QueryOptions`] (blocking and
//! pagination controls), writes embed [`WriteOptions`]; replies echo the
//! table index the result was computed at.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;

use crate::types::{AuthMethod, BindingRule, OneTimeToken, Policy, Role, RoleLink, Token, TokenType};

// ----- envelopes ----- //

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub region: SmolStr,
    #[serde(default)]
    pub namespace: SmolStr,
    #[serde(default)]
    pub auth_token: SmolStr,
    /// Blocking floor: the reply is delayed until the table index exceeds
    /// this value or the wait times out.
    #[serde(default)]
    pub min_query_index: u64,
    /// Maximum blocking time in milliseconds. Zero picks the server
    /// default.
    #[serde(rename = "MaxQueryTime", default)]
    pub max_query_time_ms: u64,
    #[serde(default)]
    pub prefix: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryMeta {
    /// Table index the reply was computed at; never decreases for a given
    /// caller.
    pub index: u64,
    /// Continuation token when pagination has more to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteOptions {
    #[serde(default)]
    pub region: SmolStr,
    #[serde(default)]
    pub namespace: SmolStr,
    #[serde(default)]
    pub auth_token: SmolStr,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteMeta {
    /// Commit index of the applied mutation.
    pub index: u64,
}

// ----- list stubs ----- //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStub {
    pub name: SmolStr,
    #[serde(default)]
    pub description: String,
    pub create_index: u64,
    pub modify_index: u64,
}

impl From<&Policy> for PolicyStub {
    fn from(policy: &Policy) -> Self {
        PolicyStub {
            name: policy.name.clone(),
            description: policy.description.clone(),
            create_index: policy.create_index,
            modify_index: policy.modify_index,
        }
    }
}

/// Listing view of a token; the secret never appears in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenStub {
    #[serde(rename = "AccessorID")]
    pub accessor_id: SmolStr,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type")]
    pub token_type: TokenType,
    #[serde(default)]
    pub policies: Vec<SmolStr>,
    #[serde(default)]
    pub roles: Vec<RoleLink>,
    #[serde(default)]
    pub global: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub create_time: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub expiration_time: Option<OffsetDateTime>,
    pub create_index: u64,
    pub modify_index: u64,
}

impl From<&Token> for TokenStub {
    fn from(token: &Token) -> Self {
        TokenStub {
            accessor_id: token.accessor_id.clone(),
            name: token.name.clone(),
            token_type: token.token_type,
            policies: token.policies.clone(),
            roles: token.roles.clone(),
            global: token.global,
            create_time: token.create_time,
            expiration_time: token.expiration_time,
            create_index: token.create_index,
            modify_index: token.modify_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthMethodStub {
    pub name: SmolStr,
    #[serde(rename = "Type")]
    pub method_type: crate::types::AuthMethodType,
    #[serde(default)]
    pub default: bool,
    pub create_index: u64,
    pub modify_index: u64,
}

impl From<&AuthMethod> for AuthMethodStub {
    fn from(method: &AuthMethod) -> Self {
        AuthMethodStub {
            name: method.name.clone(),
            method_type: method.method_type,
            default: method.default,
            create_index: method.create_index,
            modify_index: method.modify_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BindingRuleStub {
    #[serde(rename = "ID")]
    pub id: SmolStr,
    #[serde(default)]
    pub description: String,
    pub auth_method: SmolStr,
    pub create_index: u64,
    pub modify_index: u64,
}

impl From<&BindingRule> for BindingRuleStub {
    fn from(rule: &BindingRule) -> Self {
        BindingRuleStub {
            id: rule.id.clone(),
            description: rule.description.clone(),
            auth_method: rule.auth_method.clone(),
            create_index: rule.create_index,
            modify_index: rule.modify_index,
        }
    }
}

// ----- policies ----- //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetPolicyRequest {
    pub name: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetPolicyResponse {
    pub policy: Option<Policy>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetPoliciesRequest {
    pub names: Vec<SmolStr>,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetPoliciesResponse {
    pub policies: HashMap<SmolStr, Policy>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListPoliciesRequest {
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListPoliciesResponse {
    pub policies: Vec<PolicyStub>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertPoliciesRequest {
    pub policies: Vec<Policy>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeletePoliciesRequest {
    pub names: Vec<SmolStr>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenericWriteResponse {
    #[serde(flatten)]
    pub meta: WriteMeta,
}

// ----- tokens ----- //

/// Wire shape of a token upsert. Loosely typed on purpose: the write path
/// owns the validation and canonicalization, and reports bad input as
/// 400-class errors instead of decode failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenInput {
    #[serde(rename = "AccessorID", default)]
    pub accessor_id: SmolStr,
    #[serde(rename = "SecretID", default)]
    pub secret_id: SmolStr,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub token_type: SmolStr,
    #[serde(default)]
    pub policies: Vec<SmolStr>,
    #[serde(default)]
    pub roles: Vec<RoleLink>,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub expiration_time: Option<OffsetDateTime>,
    #[serde(rename = "ExpirationTTL", default, skip_serializing_if = "Option::is_none")]
    pub expiration_ttl_secs: Option<u64>,
    /// Compare-and-set floor for updates; zero skips the check.
    #[serde(default)]
    pub modify_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetTokenRequest {
    #[serde(rename = "AccessorID")]
    pub accessor_id: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetTokenResponse {
    pub token: Option<Token>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetTokensRequest {
    #[serde(rename = "AccessorIDs")]
    pub accessor_ids: Vec<SmolStr>,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetTokensResponse {
    pub tokens: HashMap<SmolStr, Token>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTokensRequest {
    /// Restrict the listing to globally replicated tokens.
    #[serde(default)]
    pub global_only: bool,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTokensResponse {
    pub tokens: Vec<TokenStub>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertTokensRequest {
    pub tokens: Vec<TokenInput>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertTokensResponse {
    /// Canonicalized tokens; creation is the one time the secret is
    /// returned.
    pub tokens: Vec<Token>,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteTokensRequest {
    #[serde(rename = "AccessorIDs")]
    pub accessor_ids: Vec<SmolStr>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BootstrapRequest {
    /// Operator-supplied secret for reproducible bootstrap; generated when
    /// absent.
    #[serde(rename = "BootstrapSecret", default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret: Option<SmolStr>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BootstrapResponse {
    pub token: Token,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResolveTokenRequest {
    #[serde(rename = "SecretID")]
    pub secret_id: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResolveTokenResponse {
    pub token: Token,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

// ----- one-time tokens ----- //

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertOneTimeTokenRequest {
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertOneTimeTokenResponse {
    pub one_time_token: OneTimeToken,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeOneTimeTokenRequest {
    #[serde(rename = "OneTimeSecretID")]
    pub one_time_secret_id: SmolStr,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeOneTimeTokenResponse {
    /// The bound token, secret included: this is the whole point of the
    /// handoff.
    pub token: Token,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpireOneTimeTokensRequest {
    #[serde(flatten)]
    pub write: WriteOptions,
}

// ----- roles ----- //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertRolesRequest {
    pub roles: Vec<Role>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertRolesResponse {
    pub roles: Vec<Role>,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRolesByIdRequest {
    #[serde(rename = "RoleIDs")]
    pub role_ids: Vec<SmolStr>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListRolesRequest {
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListRolesResponse {
    pub roles: Vec<Role>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRolesByIdRequest {
    #[serde(rename = "RoleIDs")]
    pub role_ids: Vec<SmolStr>,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRolesByIdResponse {
    pub roles: HashMap<SmolStr, Role>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRoleByIdRequest {
    #[serde(rename = "RoleID")]
    pub role_id: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRoleByNameRequest {
    pub role_name: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRoleResponse {
    pub role: Option<Role>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

// ----- auth methods ----- //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertAuthMethodsRequest {
    pub methods: Vec<AuthMethod>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertAuthMethodsResponse {
    pub methods: Vec<AuthMethod>,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteAuthMethodsRequest {
    pub names: Vec<SmolStr>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListAuthMethodsRequest {
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListAuthMethodsResponse {
    pub methods: Vec<AuthMethodStub>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetAuthMethodRequest {
    pub name: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetAuthMethodResponse {
    pub method: Option<AuthMethod>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetAuthMethodsRequest {
    pub names: Vec<SmolStr>,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetAuthMethodsResponse {
    pub methods: HashMap<SmolStr, AuthMethod>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

// ----- binding rules ----- //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertBindingRulesRequest {
    pub rules: Vec<BindingRule>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsertBindingRulesResponse {
    pub rules: Vec<BindingRule>,
    #[serde(flatten)]
    pub meta: WriteMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteBindingRulesRequest {
    #[serde(rename = "RuleIDs")]
    pub rule_ids: Vec<SmolStr>,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBindingRulesRequest {
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBindingRulesResponse {
    pub rules: Vec<BindingRuleStub>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetBindingRulesRequest {
    #[serde(rename = "RuleIDs")]
    pub rule_ids: Vec<SmolStr>,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetBindingRulesResponse {
    pub rules: HashMap<SmolStr, BindingRule>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetBindingRuleRequest {
    #[serde(rename = "RuleID")]
    pub rule_id: SmolStr,
    #[serde(flatten)]
    pub opts: QueryOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetBindingRuleResponse {
    pub rule: Option<BindingRule>,
    #[serde(flatten)]
    pub meta: QueryMeta,
}

// ----- federated login ----- //

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OidcAuthUrlRequest {
    pub auth_method: SmolStr,
    #[serde(rename = "RedirectURI")]
    pub redirect_uri: String,
    pub client_nonce: SmolStr,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OidcAuthUrlResponse {
    #[serde(rename = "AuthURL")]
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OidcCompleteAuthRequest {
    pub auth_method: SmolStr,
    pub state: SmolStr,
    pub code: String,
    #[serde(rename = "RedirectURI")]
    pub redirect_uri: String,
    pub client_nonce: SmolStr,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    pub auth_method: SmolStr,
    /// Bearer JWT presented to a `jwt`-type method.
    pub login_token: String,
    #[serde(flatten)]
    pub write: WriteOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponse {
    /// The minted native token, secret included (this is a creation).
    pub token: Token,
    #[serde(flatten)]
    pub meta: WriteMeta,
}
