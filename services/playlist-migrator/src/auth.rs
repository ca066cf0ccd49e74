//!
//! src/auth.rs
//!
//! Owns the spotify OAuth lifecycle: authorize url + state nonce, the code
//! exchange, and refresh on demand. Refresh only happens when a caller asks
//! for a token and the stored one has expired
//!

use std::sync::Arc;

use rand::{distributions::Alphanumeric, rngs::SmallRng, Rng, SeedableRng};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::MigrateError;
use crate::fetch::SpotifyClient;
use crate::persistent::Session;
use crate::types::Credential;

pub const STATE_LENGTH: usize = 16;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a token valid `expires_in` seconds from now. The
/// value comes off the wire, so it saturates instead of overflowing
fn expiry_after(expires_in: i64) -> i64 {
    now_ms().saturating_add(expires_in.saturating_mul(1000))
}

fn generate_state(len: usize) -> String {
    let mut rng = SmallRng::from_entropy();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub struct TokenManager {
    spotify: Arc<SpotifyClient>,
    session: Session,
    // held for the whole refresh so concurrent searches refresh once
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(spotify: Arc<SpotifyClient>, session: Session) -> Self {
        Self { spotify, session, refresh_lock: Mutex::new(()) }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Stores a fresh state nonce and returns the url the user must visit
    pub async fn build_authorization_url(&self) -> Result<Url, MigrateError> {
        let state = generate_state(STATE_LENGTH);
        self.session.set_pending_state(&state).await?;
        debug!("auth.url.built");
        Ok(self.spotify.authorize_url(&state))
    }

    pub async fn is_authenticated(&self) -> bool {
        match self.session.access().await {
            Ok(Some((_, expires_at))) => now_ms() < expires_at,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "auth.session.read");
                false
            }
        }
    }

    /// Exchanges `code` for tokens. Never errors: any failure is logged and
    /// reported as `false`
    pub async fn complete_authorization(&self, code: &str, state: &str) -> bool {
        match self.try_complete_authorization(code, state).await {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "auth.exchange.failed");
                false
            }
        }
    }

    async fn try_complete_authorization(&self, code: &str, state: &str) ->
        Result<bool, MigrateError> {
        let Some(expected) = self.session.pending_state().await? else {
            warn!("auth.state.missing");
            return Ok(false);
        };
        if expected != state {
            warn!("auth.state.mismatch");
            return Ok(false);
        }
        self.session.clear_pending_state().await?;

        let response = self.spotify.exchange_code(code).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "auth.exchange.status");
            return Err(MigrateError::UpstreamUnavailable {
                service: "spotify accounts",
                status: status.as_u16()
            });
        }

        let token: TokenResponse = response.json().await?;
        let refresh_token = token.refresh_token.ok_or_else(||
            MigrateError::Parse("token response missing refresh_token".to_string())
        )?;
        let credential = Credential {
            access_token: token.access_token,
            refresh_token,
            expires_at_ms: expiry_after(token.expires_in),
        };
        self.session.save_credential(&credential).await?;
        info!(expires_at = credential.expires_at_ms, "auth.exchange.done");
        Ok(true)
    }

    /// Returns a usable bearer token, refreshing once if the stored one expired
    pub async fn get_valid_access_token(&self) -> Result<String, MigrateError> {
        let credential = self.session.credential().await?
            .ok_or(MigrateError::Unauthenticated)?;
        if !credential.is_expired_at(now_ms()) {
            return Ok(credential.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // someone else may have refreshed while we waited on the lock
        let credential = self.session.credential().await?
            .ok_or(MigrateError::Unauthenticated)?;
        if !credential.is_expired_at(now_ms()) {
            return Ok(credential.access_token);
        }
        self.refresh(credential).await
    }

    async fn refresh(&self, current: Credential) -> Result<String, MigrateError> {
        debug!(expired_at = current.expires_at_ms, "auth.refresh.start");
        let response = self.spotify.refresh(&current.refresh_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "auth.refresh.failed");
            return Err(match status.as_u16() {
                400 | 401 => MigrateError::Unauthenticated,
                code => MigrateError::UpstreamUnavailable {
                    service: "spotify accounts",
                    status: code
                }
            });
        }

        let token: TokenResponse = response.json().await?;
        // providers may omit refresh_token, in which case the old one stays valid
        let refreshed = Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or(current.refresh_token),
            expires_at_ms: expiry_after(token.expires_in),
        };
        self.session.save_credential(&refreshed).await?;
        info!(expires_at = refreshed.expires_at_ms, "auth.refresh.done");
        Ok(refreshed.access_token)
    }

    pub async fn logout(&self) -> Result<(), MigrateError> {
        self.session.clear().await?;
        info!("auth.logout");
        Ok(())
    }
}
