//! Federated login: OIDC auth-URL/callback and JWT login.
//!
//! Both entry points funnel into the same downstream: map verified provider
//! claims through the method's claim mappings, evaluate every binding rule
//! of the method, and mint a native token from the accumulated bindings,
//! with `management` superseding everything else.

use serde_json::{Map, Value};
use smol_str::SmolStr;
use time::{Duration, OffsetDateTime};
use tracing::info;
use url::Url;

use crate::error::AclError;
use crate::fsm::LogEntry;
use crate::jwt;
use crate::oidc;
use crate::selector::{EvalMode, Expression};
use crate::state::Snapshot;
use crate::types::{AuthMethod, AuthMethodType, BindType, RoleLink, Token, TokenLocality, TokenType};

use super::message::*;
use super::AclEndpoint;

impl AclEndpoint {
    /// `ACL.OIDCAuthURL`: unauthenticated first leg of the OIDC flow.
    pub async fn oidc_auth_url(&self, req: &OidcAuthUrlRequest) -> Result<OidcAuthUrlResponse, AclError> {
        let method = self.oidc_method(&req.auth_method)?;

        let redirect_uri = Url::parse(&req.redirect_uri)
            .map_err(|_| AclError::validation("invalid OIDC auth-url request: bad redirect URI"))?;
        if !method.allows_redirect_uri(&redirect_uri) {
            return Err(AclError::validation(
                "invalid OIDC auth-url request: redirect URI is not in the allow-list",
            ));
        }
        if req.client_nonce.is_empty() {
            return Err(AclError::validation("invalid OIDC auth-url request: client nonce is required"));
        }

        let state = self.sessions().create(
            method.name.clone(),
            req.client_nonce.clone(),
            redirect_uri.clone(),
            OffsetDateTime::now_utc(),
        );

        let endpoint = self.oidc_provider().authorization_endpoint(&method).await?;
        let auth_url = oidc::build_auth_url(&endpoint, &method, &redirect_uri, &req.client_nonce, &state);

        Ok(OidcAuthUrlResponse {
            auth_url: auth_url.into(),
        })
    }

    /// `ACL.OIDCCompleteAuth`: callback leg; verifies the remembered
    /// state, exchanges the code through the provider, then binds and
    /// mints.
    pub async fn oidc_complete_auth(&self, req: &OidcCompleteAuthRequest) -> Result<LoginResponse, AclError> {
        let method = self.oidc_method(&req.auth_method)?;

        let session = self
            .sessions()
            .take(&req.state, OffsetDateTime::now_utc())
            .ok_or_else(|| AclError::validation("invalid OIDC callback state"))?;

        let redirect_uri = Url::parse(&req.redirect_uri)
            .map_err(|_| AclError::validation("invalid OIDC auth-url request: bad redirect URI"))?;
        if session.method != method.name || session.nonce != req.client_nonce || session.redirect_uri != redirect_uri {
            return Err(AclError::validation("invalid OIDC callback state"));
        }

        let claims = self
            .oidc_provider()
            .exchange(&method, &req.code, &session.nonce, &redirect_uri)
            .await?;

        self.bind_and_mint(&method, &claims).await
    }

    /// `ACL.Login`: bearer JWT against a `jwt`-type method.
    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse, AclError> {
        let Some(method) = self.store().snapshot().auth_method(&req.auth_method) else {
            return Err(AclError::validation(format!("auth-method {} not found", req.auth_method)));
        };
        if method.method_type != AuthMethodType::Jwt {
            return Err(AclError::validation(format!(
                "auth-method {} does not support JWT login",
                method.name
            )));
        }

        let config = &method.config;
        let keys = jwt::parse_public_keys(&config.jwt_validation_pub_keys)
            .map_err(|error| AclError::validation(format!("failed to validate login token: {error}")))?;

        let leeway_secs = [
            config.expiration_leeway_secs,
            config.not_before_leeway_secs,
            config.clock_skew_leeway_secs,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        let leeway_secs = u16::try_from(leeway_secs).unwrap_or(u16::MAX);

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = jwt::verify(&req.login_token, &keys, now, leeway_secs)
            .and_then(|claims| {
                jwt::check_issuer(&claims, &config.bound_issuer)?;
                jwt::check_audience(&claims, &config.bound_audiences)?;
                Ok(claims)
            })
            .map_err(|error| AclError::validation(format!("failed to validate login token: {error}")))?;

        self.bind_and_mint(&method, &claims).await
    }

    fn oidc_method(&self, name: &str) -> Result<AuthMethod, AclError> {
        let Some(method) = self.store().snapshot().auth_method(name) else {
            return Err(AclError::validation(format!("auth-method {name} not found")));
        };
        if method.method_type != AuthMethodType::Oidc {
            return Err(AclError::validation(
                "invalid OIDC auth-url request: auth method is not OIDC",
            ));
        }
        Ok((*method).clone())
    }

    /// Shared tail of every login: claim mapping, binding-rule evaluation,
    /// token minting, commit.
    async fn bind_and_mint(&self, method: &AuthMethod, claims: &Value) -> Result<LoginResponse, AclError> {
        let snapshot = self.store().snapshot();
        let datum = map_claims(method, claims);
        let bindings = evaluate_bindings(&snapshot, method, &datum)?;

        let now = OffsetDateTime::now_utc();
        let token = mint_token(method, bindings, now);
        info!(method = %method.name, accessor = %token.accessor_id, "federated login minted a token");

        let applied = self.submit(LogEntry::TokenUpsert { tokens: vec![token.clone()] }).await?;

        let mut token = token;
        token.create_index = applied.index;
        token.modify_index = applied.index;

        Ok(LoginResponse {
            token,
            meta: WriteMeta { index: applied.index },
        })
    }
}

/// Accumulated grants from the method's binding rules.
#[derive(Debug, Default)]
struct Bindings {
    management: bool,
    policies: Vec<SmolStr>,
    roles: Vec<RoleLink>,
}

/// Projects verified provider claims into the selector datum:
/// `value.<field>` for scalar mappings, `list.<field>` for list mappings.
fn map_claims(method: &AuthMethod, claims: &Value) -> Value {
    let mut value_fields = Map::new();
    for (claim, field) in &method.config.claim_mappings {
        if let Some(found) = claim_path(claims, claim).and_then(scalar_to_string) {
            value_fields.insert(field.to_string(), Value::String(found));
        }
    }

    let mut list_fields = Map::new();
    for (claim, field) in &method.config.list_claim_mappings {
        let Some(found) = claim_path(claims, claim) else {
            continue;
        };
        let items: Vec<Value> = match found {
            Value::Array(items) => items.iter().filter_map(scalar_to_string).map(Value::String).collect(),
            scalar => scalar_to_string(scalar).map(Value::String).into_iter().collect(),
        };
        list_fields.insert(field.to_string(), Value::Array(items));
    }

    let mut datum = Map::new();
    datum.insert("value".to_owned(), Value::Object(value_fields));
    datum.insert("list".to_owned(), Value::Object(list_fields));
    Value::Object(datum)
}

fn claim_path<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = claims;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Evaluates every binding rule of the method against the mapped claims.
/// A selector that no longer parses fails the login: misconfiguration must
/// surface, not silently drop a grant source.
fn evaluate_bindings(snapshot: &Snapshot, method: &AuthMethod, datum: &Value) -> Result<Bindings, AclError> {
    let mut bindings = Bindings::default();

    for rule in snapshot.binding_rules_for_method(&method.name) {
        if !rule.selector.is_empty() {
            let expression = Expression::parse(&rule.selector).map_err(|error| {
                AclError::validation(format!("binding rule {} selector is invalid: {error}", rule.id))
            })?;
            let matched = expression
                .evaluate(datum, EvalMode::Selector)
                .map_err(|error| AclError::validation(error.to_string()))?;
            if !matched {
                continue;
            }
        }

        match rule.parsed_bind_type() {
            Some(BindType::Management) => bindings.management = true,
            Some(BindType::Policy) => {
                let name = SmolStr::new(&rule.bind_name);
                if !bindings.policies.contains(&name) {
                    bindings.policies.push(name);
                }
            }
            Some(BindType::Role) => {
                // Roles resolve by bind name; a dangling role confers
                // nothing, mirroring resolver semantics.
                if let Some(role) = snapshot.role_by_name(&rule.bind_name) {
                    if !bindings.roles.iter().any(|link| link.id == role.id) {
                        bindings.roles.push(RoleLink {
                            id: role.id.clone(),
                            name: role.name.clone(),
                        });
                    }
                }
            }
            None => {
                return Err(AclError::validation(format!(
                    "binding rule {} has an unsupported bind type: {}",
                    rule.id, rule.bind_type
                )));
            }
        }
    }

    if !bindings.management && bindings.policies.is_empty() && bindings.roles.is_empty() {
        return Err(AclError::validation("no role or policy bindings matched"));
    }

    Ok(bindings)
}

fn mint_token(method: &AuthMethod, bindings: Bindings, now: OffsetDateTime) -> Token {
    let (token_type, policies, roles) = if bindings.management {
        // Management supersedes: accumulated policy and role bindings are
        // discarded.
        (TokenType::Management, Vec::new(), Vec::new())
    } else {
        (TokenType::Client, bindings.policies, bindings.roles)
    };

    let mut token = Token::new_client(format!("{}-{}", method.method_type, method.name), policies, roles);
    token.token_type = token_type;
    token.global = method.token_locality == TokenLocality::Global;
    token.create_time = now;
    token.expiration_time = Some(now + Duration::seconds(i64::try_from(method.max_token_ttl_secs).unwrap_or(i64::MAX)));
    token.set_hash();
    token
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::state::StateStore;
    use crate::types::{AuthMethodConfig, BindingRule, PolicyLink, Role};

    use super::*;

    fn oidc_method() -> AuthMethod {
        let mut config = AuthMethodConfig::default();
        config.list_claim_mappings.insert("groups".into(), "policies".into());
        config.claim_mappings.insert("preferred_username".into(), "user".into());
        AuthMethod {
            name: "github".into(),
            method_type: AuthMethodType::Oidc,
            token_locality: TokenLocality::Global,
            max_token_ttl_secs: 3600,
            default: false,
            config,
            hash: Vec::new(),
            create_index: 0,
            modify_index: 0,
        }
    }

    #[test]
    fn claims_map_into_value_and_list_fields() {
        let method = oidc_method();
        let datum = map_claims(
            &method,
            &json!({ "preferred_username": "dev", "groups": ["engineering", "support"] }),
        );
        assert_eq!(datum["value"]["user"], "dev");
        assert_eq!(datum["list"]["policies"][0], "engineering");
    }

    #[test]
    fn management_binding_supersedes() {
        let store = StateStore::new();
        let method = oidc_method();
        store.upsert_roles(2, vec![Role::new("role1", vec![PolicyLink::new("p1")])]);

        let mut by_policy = BindingRule::new("github", BindType::Policy, "p1");
        by_policy.selector = "engineering in list.policies".to_owned();
        let by_role = BindingRule::new("github", BindType::Role, "role1");
        let mut by_mgmt = BindingRule::new("github", BindType::Management, "");
        by_mgmt.selector = "engineering in list.policies".to_owned();
        store.upsert_binding_rules(3, vec![by_policy, by_role, by_mgmt]);

        let datum = map_claims(&method, &json!({ "groups": ["engineering"] }));
        let bindings = evaluate_bindings(&store.snapshot(), &method, &datum).expect("bindings match");
        assert!(bindings.management);

        let token = mint_token(&method, bindings, OffsetDateTime::now_utc());
        assert_eq!(token.token_type, TokenType::Management);
        assert!(token.policies.is_empty());
        assert!(token.roles.is_empty());
        assert!(token.global);
    }

    #[test]
    fn policy_and_role_bindings_accumulate() {
        let store = StateStore::new();
        let method = oidc_method();
        store.upsert_roles(2, vec![Role::new("role1", vec![PolicyLink::new("p1")])]);

        let mut by_policy = BindingRule::new("github", BindType::Policy, "p1");
        by_policy.selector = "engineering in list.policies".to_owned();
        let by_role = BindingRule::new("github", BindType::Role, "role1");
        store.upsert_binding_rules(3, vec![by_policy, by_role]);

        let snapshot = store.snapshot();
        let role_id = snapshot.role_by_name("role1").expect("role exists").id.clone();

        let datum = map_claims(&method, &json!({ "groups": ["engineering"] }));
        let bindings = evaluate_bindings(&snapshot, &method, &datum).expect("bindings match");
        let token = mint_token(&method, bindings, OffsetDateTime::now_utc());

        assert_eq!(token.token_type, TokenType::Client);
        assert_eq!(token.policies, vec![SmolStr::new("p1")]);
        assert_eq!(token.roles, vec![RoleLink { id: role_id, name: "role1".into() }]);
    }

    #[test]
    fn no_matching_bindings_is_permission_denied() {
        let store = StateStore::new();
        let method = oidc_method();

        let mut rule = BindingRule::new("github", BindType::Policy, "p1");
        rule.selector = "finance in list.policies".to_owned();
        store.upsert_binding_rules(2, vec![rule]);

        let datum = map_claims(&method, &json!({ "groups": ["engineering"] }));
        let err = evaluate_bindings(&store.snapshot(), &method, &datum).expect_err("nothing matches");
        assert!(err.to_string().contains("no role or policy bindings matched"));
    }

    #[test]
    fn broken_selector_fails_the_login() {
        let store = StateStore::new();
        let method = oidc_method();

        let mut rule = BindingRule::new("github", BindType::Policy, "p1");
        rule.selector = "engineering in".to_owned();
        store.upsert_binding_rules(2, vec![rule]);

        let datum = map_claims(&method, &json!({ "groups": ["engineering"] }));
        let err = evaluate_bindings(&store.snapshot(), &method, &datum).expect_err("selector is broken");
        assert!(err.is_validation());
    }
}
