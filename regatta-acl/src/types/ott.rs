use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::{Duration, OffsetDateTime};

use super::token::random_id;

/// Lifetime of a one-time token from issue to expiry.
pub const ONE_TIME_TOKEN_TTL: Duration = Duration::minutes(10);

/// Single-use handoff credential bound to an existing token.
///
/// A successful exchange returns the bound token and deletes the row
/// atomically; expired rows linger until the management-gated expire sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OneTimeToken {
    #[serde(rename = "OneTimeSecretID")]
    pub one_time_secret_id: SmolStr,
    #[serde(rename = "AccessorID")]
    pub accessor_id: SmolStr,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl OneTimeToken {
    pub fn issue(accessor_id: SmolStr, now: OffsetDateTime) -> Self {
        OneTimeToken {
            one_time_secret_id: random_id(),
            accessor_id,
            expires_at: now + ONE_TIME_TOKEN_TTL,
            create_index: 0,
            modify_index: 0,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}
