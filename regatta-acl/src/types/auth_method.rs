use core::fmt;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

use super::{serde_hash, ContentHasher};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethodType {
    #[serde(rename = "OIDC")]
    Oidc,
    #[serde(rename = "JWT")]
    Jwt,
}

impl fmt::Display for AuthMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethodType::Oidc => write!(f, "OIDC"),
            AuthMethodType::Jwt => write!(f, "JWT"),
        }
    }
}

/// Where tokens minted through an auth method live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenLocality {
    Local,
    Global,
}

/// Named configuration of an external identity provider.
///
/// At most one method per type may be the default for its type; the write
/// path enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthMethod {
    pub name: SmolStr,
    #[serde(rename = "Type")]
    pub method_type: AuthMethodType,
    pub token_locality: TokenLocality,
    /// Lifetime of minted tokens, in seconds.
    #[serde(rename = "MaxTokenTTL")]
    pub max_token_ttl_secs: u64,
    #[serde(default)]
    pub default: bool,
    pub config: AuthMethodConfig,
    #[serde(default, with = "serde_hash")]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthMethodConfig {
    /// OIDC discovery endpoint, e.g. `https://idp.example.com/.well-known/…`.
    #[serde(rename = "OIDCDiscoveryURL", default, skip_serializing_if = "Option::is_none")]
    pub oidc_discovery_url: Option<Url>,
    #[serde(rename = "OIDCClientID", default)]
    pub oidc_client_id: String,
    #[serde(rename = "OIDCClientSecret", default)]
    pub oidc_client_secret: String,
    #[serde(default)]
    pub allowed_redirect_uris: Vec<Url>,
    #[serde(default)]
    pub signing_algs: Vec<SmolStr>,
    /// PEM bundle anchoring TLS towards the provider.
    #[serde(rename = "DiscoveryCaPem", default)]
    pub discovery_ca_pem: Vec<String>,
    #[serde(default)]
    pub bound_audiences: Vec<SmolStr>,
    #[serde(default)]
    pub bound_issuer: Vec<SmolStr>,
    /// PEM-encoded public keys accepted for locally validated JWT logins.
    #[serde(rename = "JWTValidationPubKeys", default)]
    pub jwt_validation_pub_keys: Vec<String>,
    #[serde(default)]
    pub expiration_leeway_secs: u64,
    #[serde(default)]
    pub not_before_leeway_secs: u64,
    #[serde(default)]
    pub clock_skew_leeway_secs: u64,
    /// Claim → field mappings for single values, consulted by binding-rule
    /// selectors as `value.<field>`.
    #[serde(default)]
    pub claim_mappings: HashMap<SmolStr, SmolStr>,
    /// Claim → field mappings for list values, consulted as `list.<field>`.
    #[serde(default)]
    pub list_claim_mappings: HashMap<SmolStr, SmolStr>,
}

impl AuthMethod {
    pub fn compute_hash(&self) -> Vec<u8> {
        let config = &self.config;
        let mut hasher = ContentHasher::new()
            .field(&self.name)
            .field(match self.method_type {
                AuthMethodType::Oidc => "OIDC",
                AuthMethodType::Jwt => "JWT",
            })
            .field(match self.token_locality {
                TokenLocality::Local => "local",
                TokenLocality::Global => "global",
            })
            .field(&self.max_token_ttl_secs.to_string())
            .flag(self.default)
            .field(config.oidc_discovery_url.as_ref().map(Url::as_str).unwrap_or_default())
            .field(&config.oidc_client_id)
            .field(&config.oidc_client_secret);
        for uri in &config.allowed_redirect_uris {
            hasher = hasher.field(uri.as_str());
        }
        for alg in &config.signing_algs {
            hasher = hasher.field(alg);
        }
        for pem in config.discovery_ca_pem.iter().chain(&config.jwt_validation_pub_keys) {
            hasher = hasher.field(pem);
        }
        for value in config.bound_audiences.iter().chain(&config.bound_issuer) {
            hasher = hasher.field(value);
        }
        hasher = hasher
            .field(&config.expiration_leeway_secs.to_string())
            .field(&config.not_before_leeway_secs.to_string())
            .field(&config.clock_skew_leeway_secs.to_string());
        for (claim, field) in sorted(&config.claim_mappings) {
            hasher = hasher.field(claim).field(field);
        }
        for (claim, field) in sorted(&config.list_claim_mappings) {
            hasher = hasher.field(claim).field(field);
        }
        hasher.finish()
    }

    pub fn set_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Whether `redirect_uri` appears in the allow-list. Comparison is by
    /// full URL equality after parsing.
    pub fn allows_redirect_uri(&self, redirect_uri: &Url) -> bool {
        self.config.allowed_redirect_uris.iter().any(|allowed| allowed == redirect_uri)
    }
}

fn sorted<'a>(map: &'a HashMap<SmolStr, SmolStr>) -> Vec<(&'a SmolStr, &'a SmolStr)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by_key(|(claim, _)| *claim);
    entries
}
