//! OIDC plumbing for federated login.
//!
//! The provider library (discovery, code exchange, id-token verification)
//! is an external collaborator behind [`OidcProvider`]; this module owns
//! what the ACL core itself is responsible for: the authorization URL, and
//! the `st_…` state values remembered between the auth-URL and callback
//! steps.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore as _;
use regatta_task::{ShutdownSignal, Task};
use serde_json::Value;
use smol_str::SmolStr;
use time::{Duration, OffsetDateTime};
use tracing::{debug, instrument};
use url::Url;

use crate::error::AclError;
use crate::types::AuthMethod;

/// How long a pending auth-URL handshake stays exchangeable.
const AUTH_SESSION_TTL: Duration = Duration::minutes(10);

/// External OIDC provider seam.
#[async_trait]
pub trait OidcProvider: Send + Sync {
    /// Authorization endpoint for the method, typically resolved through
    /// provider discovery.
    async fn authorization_endpoint(&self, method: &AuthMethod) -> Result<Url, AclError>;

    /// Exchanges the authorization code and returns the *verified* id-token
    /// claims (signature, nonce and provider-side checks included).
    async fn exchange(&self, method: &AuthMethod, code: &str, nonce: &str, redirect_uri: &Url) -> Result<Value, AclError>;
}

/// Placeholder provider for deployments without OIDC methods; every call
/// reports the missing wiring.
pub struct NoOidcProvider;

#[async_trait]
impl OidcProvider for NoOidcProvider {
    async fn authorization_endpoint(&self, _method: &AuthMethod) -> Result<Url, AclError> {
        Err(AclError::validation("no OIDC provider is configured"))
    }

    async fn exchange(&self, _method: &AuthMethod, _code: &str, _nonce: &str, _redirect_uri: &Url) -> Result<Value, AclError> {
        Err(AclError::validation("no OIDC provider is configured"))
    }
}

/// One remembered auth-URL handshake, keyed by its state value.
#[derive(Debug, Clone)]
pub(crate) struct AuthSession {
    pub(crate) method: SmolStr,
    pub(crate) nonce: SmolStr,
    pub(crate) redirect_uri: Url,
    expires_at: OffsetDateTime,
}

/// Pending handshakes; state values are single-use and expire after
/// [`AUTH_SESSION_TTL`].
#[derive(Default)]
pub(crate) struct PendingAuthSessions {
    inner: Mutex<HashMap<SmolStr, AuthSession>>,
}

impl PendingAuthSessions {
    pub(crate) fn new() -> Self {
        PendingAuthSessions::default()
    }

    /// Remembers a handshake and returns its `st_…` state value.
    pub(crate) fn create(&self, method: SmolStr, nonce: SmolStr, redirect_uri: Url, now: OffsetDateTime) -> SmolStr {
        let state = new_state_value();
        let mut inner = self.inner.lock();
        // Piggyback expired-entry cleanup on creation; the map stays small.
        inner.retain(|_, session| now < session.expires_at);
        inner.insert(
            state.clone(),
            AuthSession {
                method,
                nonce,
                redirect_uri,
                expires_at: now + AUTH_SESSION_TTL,
            },
        );
        state
    }

    /// Removes and returns the handshake for `state`, if it is still live.
    pub(crate) fn take(&self, state: &str, now: OffsetDateTime) -> Option<AuthSession> {
        let session = self.inner.lock().remove(state)?;
        (now < session.expires_at).then_some(session)
    }

    /// Drops every expired handshake; returns how many were removed.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, session| now < session.expires_at);
        before - inner.len()
    }
}

/// Periodically drops abandoned auth-URL handshakes, so callers that never
/// come back do not accumulate state.
pub struct CleanupTask {
    pub sessions: Arc<PendingAuthSessions>,
}

#[async_trait]
impl Task for CleanupTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "oidc session cleanup";

    async fn run(self, shutdown_signal: ShutdownSignal) -> Self::Output {
        cleanup_task(self.sessions, shutdown_signal).await;
        Ok(())
    }
}

#[instrument(skip_all)]
async fn cleanup_task(sessions: Arc<PendingAuthSessions>, mut shutdown_signal: ShutdownSignal) {
    const TASK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 5);

    debug!("Task started");

    loop {
        if shutdown_signal.wait_timeout(TASK_INTERVAL).await {
            break;
        }
        let removed = sessions.purge_expired(OffsetDateTime::now_utc());
        if removed > 0 {
            debug!(removed, "dropped expired OIDC auth sessions");
        }
    }

    debug!("Task terminated");
}

fn new_state_value() -> SmolStr {
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    SmolStr::new(format!("st_{}", hex::encode(bytes)))
}

/// Builds the provider authorization URL for the auth-URL step.
pub(crate) fn build_auth_url(
    authorization_endpoint: &Url,
    method: &AuthMethod,
    redirect_uri: &Url,
    nonce: &str,
    state: &str,
) -> Url {
    let mut url = authorization_endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &method.config.oidc_client_id)
        .append_pair("nonce", nonce)
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("response_type", "code")
        .append_pair("scope", "openid")
        .append_pair("state", state);
    url
}
