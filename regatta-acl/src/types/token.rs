use core::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{serde_hash, ContentHasher, ANONYMOUS_POLICY_NAME};

/// Name carried by the management token minted through the bootstrap
/// protocol. Exactly one token with this name and type `management` exists at
/// any time after bootstrap.
pub const BOOTSTRAP_TOKEN_NAME: &str = "Bootstrap Token";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Client,
    Management,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Client => write!(f, "client"),
            TokenType::Management => write!(f, "management"),
        }
    }
}

/// A bearer credential.
///
/// The accessor is the public handle (listing, deletion, audit); the secret
/// is shown once at creation and authenticates the caller from then on. The
/// secret must never reach a log sink, which is why `Debug` is implemented by
/// hand below.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Token {
    #[serde(rename = "AccessorID", default)]
    pub accessor_id: SmolStr,
    #[serde(rename = "SecretID", default)]
    pub secret_id: SmolStr,
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
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub expiration_time: Option<OffsetDateTime>,
    /// Creation-time TTL in seconds; the write path turns it into an
    /// absolute `expiration_time` and bounds it by the configured range.
    #[serde(rename = "ExpirationTTL", default, skip_serializing_if = "Option::is_none")]
    pub expiration_ttl_secs: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub create_time: OffsetDateTime,
    #[serde(default, with = "serde_hash")]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

/// Canonicalized role reference: the write path resolves whichever of id or
/// name the caller supplied and stores both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleLink {
    #[serde(rename = "ID", default)]
    pub id: SmolStr,
    #[serde(default)]
    pub name: SmolStr,
}

impl Token {
    /// A fresh client token with server-assigned accessor and secret.
    pub fn new_client(name: impl Into<String>, policies: Vec<SmolStr>, roles: Vec<RoleLink>) -> Self {
        let mut token = Token {
            accessor_id: random_id(),
            secret_id: random_id(),
            name: name.into(),
            token_type: TokenType::Client,
            policies,
            roles,
            global: false,
            expiration_time: None,
            expiration_ttl_secs: None,
            create_time: OffsetDateTime::now_utc(),
            hash: Vec::new(),
            create_index: 0,
            modify_index: 0,
        };
        token.set_hash();
        token
    }

    /// The synthetic token standing in for an absent credential. Never
    /// persisted; accessor and secret are empty by construction.
    pub fn anonymous() -> Self {
        let mut token = Token {
            accessor_id: SmolStr::default(),
            secret_id: SmolStr::default(),
            name: "Anonymous Token".to_owned(),
            token_type: TokenType::Client,
            policies: vec![SmolStr::new_static(ANONYMOUS_POLICY_NAME)],
            roles: Vec::new(),
            global: false,
            expiration_time: None,
            expiration_ttl_secs: None,
            create_time: OffsetDateTime::UNIX_EPOCH,
            hash: Vec::new(),
            create_index: 0,
            modify_index: 0,
        };
        token.set_hash();
        token
    }

    pub fn is_management(&self) -> bool {
        matches!(self.token_type, TokenType::Management)
    }

    /// Whether the token is past its expiration at `now`. Tokens without an
    /// expiration never expire.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expiration_time {
            Some(expiration) => expiration <= now,
            None => false,
        }
    }

    pub fn compute_hash(&self) -> Vec<u8> {
        let mut hasher = ContentHasher::new()
            .field(&self.name)
            .field(match self.token_type {
                TokenType::Client => "client",
                TokenType::Management => "management",
            })
            .flag(self.global);
        for policy in &self.policies {
            hasher = hasher.field(policy);
        }
        for role in &self.roles {
            hasher = hasher.field(&role.id);
        }
        hasher.finish()
    }

    pub fn set_hash(&mut self) {
        self.hash = self.compute_hash();
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("accessor_id", &self.accessor_id)
            .field("secret_id", &"<redacted>")
            .field("name", &self.name)
            .field("token_type", &self.token_type)
            .field("policies", &self.policies)
            .field("roles", &self.roles)
            .field("global", &self.global)
            .field("expiration_time", &self.expiration_time)
            .field("create_index", &self.create_index)
            .field("modify_index", &self.modify_index)
            .finish_non_exhaustive()
    }
}

impl RoleLink {
    pub fn by_id(id: impl Into<SmolStr>) -> Self {
        RoleLink {
            id: id.into(),
            name: SmolStr::default(),
        }
    }

    pub fn by_name(name: impl Into<SmolStr>) -> Self {
        RoleLink {
            id: SmolStr::default(),
            name: name.into(),
        }
    }
}

pub(crate) fn random_id() -> SmolStr {
    SmolStr::new(Uuid::new_v4().to_string())
}
