use time::OffsetDateTime;
use tracing::debug;

use crate::error::AclError;
use crate::fsm::{ApplyOutput, LogEntry};
use crate::types::OneTimeToken;

use super::message::*;
use super::AclEndpoint;

impl AclEndpoint {
    /// `ACL.UpsertOneTimeToken`: any authenticated caller; the minted OTT
    /// is bound to the caller's own accessor.
    pub async fn upsert_one_time_token(&self, req: &UpsertOneTimeTokenRequest) -> Result<UpsertOneTimeTokenResponse, AclError> {
        if req.write.auth_token.is_empty() {
            return Err(AclError::PermissionDenied);
        }
        // Resolve first so disabled ACLs and the leader secret behave as
        // everywhere else, then pin the caller's token record.
        self.authenticate(&req.write.auth_token)?;

        let snapshot = self.store().snapshot();
        let caller = self.caller_token(&snapshot, &req.write.auth_token)?;
        if caller.accessor_id.is_empty() {
            return Err(AclError::PermissionDenied);
        }

        let mut ott = OneTimeToken::issue(caller.accessor_id.clone(), OffsetDateTime::now_utc());
        let applied = self.submit(LogEntry::OneTimeTokenUpsert { ott: ott.clone() }).await?;
        ott.create_index = applied.index;
        ott.modify_index = applied.index;

        Ok(UpsertOneTimeTokenResponse {
            one_time_token: ott,
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.ExchangeOneTimeToken`: unauthenticated. A missing, consumed or
    /// expired OTT all answer permission-denied so the caller cannot tell
    /// "never existed" from "already used".
    pub async fn exchange_one_time_token(&self, req: &ExchangeOneTimeTokenRequest) -> Result<ExchangeOneTimeTokenResponse, AclError> {
        let snapshot = self.store().snapshot();
        let Some(ott) = snapshot.one_time_token(&req.one_time_secret_id) else {
            return Err(AclError::PermissionDenied);
        };

        // Expired entries stay in place for the expire sweep.
        if ott.is_expired(OffsetDateTime::now_utc()) {
            return Err(AclError::PermissionDenied);
        }

        let applied = self
            .submit(LogEntry::OneTimeTokenDelete {
                secret: req.one_time_secret_id.clone(),
            })
            .await?;
        if applied.output != (ApplyOutput::OneTimeTokenDeleted { found: true }) {
            // Lost the compare-and-delete race: someone exchanged it first.
            debug!("one-time token was consumed concurrently");
            return Err(AclError::PermissionDenied);
        }

        let token = self
            .store()
            .snapshot()
            .token_by_accessor(&ott.accessor_id)
            .ok_or(AclError::PermissionDenied)?;

        Ok(ExchangeOneTimeTokenResponse {
            token: (*token).clone(),
            meta: WriteMeta { index: applied.index },
        })
    }

    /// `ACL.ExpireOneTimeTokens`: management-gated sweep of expired
    /// entries.
    pub async fn expire_one_time_tokens(&self, req: &ExpireOneTimeTokensRequest) -> Result<GenericWriteResponse, AclError> {
        self.require_management(&req.write.auth_token)?;

        let applied = self
            .submit(LogEntry::OneTimeTokenExpire {
                now: OffsetDateTime::now_utc(),
            })
            .await?;
        if let ApplyOutput::OneTimeTokensExpired { count } = applied.output {
            debug!(count, "expired one-time tokens removed");
        }

        Ok(GenericWriteResponse {
            meta: WriteMeta { index: applied.index },
        })
    }
}
