//! Workload identity claim verification.
//!
//! The cluster signs a JWT for every running task asserting (allocation,
//! task). Verification checks the signature against the server's identity
//! keys, then vets the allocation: absent allocations are rejected outright
//! and terminal ones are treated as expired credentials. Grant resolution
//! goes through the policy compiler's job-grant path.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::capability::Capability;
use crate::compiler::{self, CapabilityCache};
use crate::error::AclError;
use crate::jwt;
use crate::state::Snapshot;
use crate::types::{Allocation, IdentityClaims};

const IDENTITY_LEEWAY_SECS: u16 = 60;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error(transparent)]
    Jwt(#[from] jwt::JwtError),

    #[error("claim set is malformed")]
    MalformedClaims { source: serde_json::Error },

    #[error("allocation does not exist")]
    UnknownAllocation,

    #[error("allocation is terminal")]
    TerminalAllocation,
}

impl From<ClaimError> for AclError {
    fn from(value: ClaimError) -> Self {
        match value {
            // Terminal claims behave like expired credentials.
            ClaimError::TerminalAllocation => AclError::TokenExpired,
            other => AclError::validation(other.to_string()),
        }
    }
}

/// Verifies a cluster-signed workload JWT and returns its claims together
/// with the live allocation they speak for.
pub fn verify_identity(
    snapshot: &Snapshot,
    identity_pub_keys: &[String],
    token: &str,
    now: OffsetDateTime,
) -> Result<(IdentityClaims, Arc<Allocation>), ClaimError> {
    let keys = jwt::parse_public_keys(identity_pub_keys)?;
    let raw: Value = jwt::verify(token, &keys, now.unix_timestamp(), IDENTITY_LEEWAY_SECS)?;
    let claims: IdentityClaims = serde_json::from_value(raw).map_err(|source| ClaimError::MalformedClaims { source })?;

    let allocation = snapshot.allocation(&claims.alloc_id).ok_or(ClaimError::UnknownAllocation)?;
    if allocation.is_terminal() {
        return Err(ClaimError::TerminalAllocation);
    }

    Ok((claims, allocation))
}

/// Capability object for a verified claim, scoped to the allocation's job.
pub fn resolve_claims(
    cache: &CapabilityCache,
    snapshot: &Snapshot,
    claims: &IdentityClaims,
    allocation: &Allocation,
) -> Capability {
    let policies = compiler::policies_for_claim(snapshot, allocation, &claims.task);
    compiler::compile(cache, &policies)
}
