// =============================================================================
// OAuth session manager (§4.3)
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, instrument, warn};

use crate::error::CoreError;
use crate::events::{Event, EventKind, EventSink};
use crate::secret_store::{Credentials, SecretStore};
use crate::types::AccountMode;

use super::signing::{generate_nonce, sign, unix_timestamp, SigningInput};

const IDLE_EXPIRY_SECS: i64 = 2 * 60 * 60;
const CLOCK_SKEW_TOLERANCE_SECS: i64 = 120;

/// A snapshot of credentials plus bookkeeping, swapped as a whole under
/// a short write lock on rotation/renewal rather than mutated field by
/// field — approximates "signers read via atomic pointer" (§5) without
/// a true lock-free structure, acceptable because rotation is rare
/// relative to signing frequency.
#[derive(Clone)]
struct Session {
    credentials: Credentials,
    last_used: DateTime<Utc>,
    authenticated: bool,
}

pub struct OAuthSessionManager {
    environment: AccountMode,
    base_url: String,
    secret_store: Arc<dyn SecretStore>,
    session: RwLock<Arc<Session>>,
    rotation_tx: watch::Sender<u64>,
    events: EventSink,
    client: reqwest::Client,
}

impl OAuthSessionManager {
    pub async fn new(
        environment: AccountMode,
        base_url: impl Into<String>,
        secret_store: Arc<dyn SecretStore>,
        events: EventSink,
    ) -> Result<Self> {
        let credentials = secret_store.load().await.context("loading OAuth credentials")?;
        let (rotation_tx, _rx) = watch::channel(0);
        Ok(Self {
            environment,
            base_url: base_url.into(),
            secret_store,
            session: RwLock::new(Arc::new(Session {
                credentials,
                last_used: Utc::now(),
                authenticated: true,
            })),
            rotation_tx,
            events,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
        })
    }

    pub fn subscribe_rotation(&self) -> watch::Receiver<u64> {
        self.rotation_tx.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.authenticated
    }

    pub async fn last_used(&self) -> DateTime<Utc> {
        self.session.read().await.last_used
    }

    /// Sign a request. Refuses outright if the reference clock looks
    /// skewed by more than `CLOCK_SKEW_TOLERANCE_SECS` — per §4.3 this
    /// is a fatal precondition, never silently signed anyway.
    #[instrument(skip(self, extra_params), fields(env = ?self.environment))]
    pub async fn sign_request(
        &self,
        method: &str,
        url: &str,
        extra_params: &[(&str, &str)],
        reference_now: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        let skew = (Utc::now() - reference_now).num_seconds().abs();
        if skew > CLOCK_SKEW_TOLERANCE_SECS {
            return Err(CoreError::Fatal(format!(
                "clock skew {skew}s exceeds tolerance {CLOCK_SKEW_TOLERANCE_SECS}s"
            )));
        }

        let session = {
            let guard = self.session.read().await;
            if !guard.authenticated {
                return Err(CoreError::NotAuthenticated("no valid session".into()));
            }
            guard.clone()
        };

        let nonce = generate_nonce();
        let timestamp = unix_timestamp();
        let input = SigningInput {
            method,
            url,
            consumer_key: &session.credentials.consumer_key,
            consumer_secret: &session.credentials.consumer_secret,
            token: &session.credentials.access_token,
            token_secret: &session.credentials.access_token_secret,
            extra_params,
        };
        let header = sign(&input, &nonce, timestamp);

        let mut guard = self.session.write().await;
        let mut updated = (*guard).clone();
        updated.last_used = Utc::now();
        *guard = Arc::new(updated);

        Ok(header)
    }

    /// Idle-renewal: no user interaction required. Calendar-day expiry
    /// (needs the three-legged flow) is out of scope for in-process
    /// recovery; only idle renewal is automatic.
    #[instrument(skip(self))]
    pub async fn renew(&self) -> Result<()> {
        let session = self.session.read().await.clone();
        let url = format!("{}/oauth/renew_access_token", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", {
                let input = SigningInput {
                    method: "POST",
                    url: &url,
                    consumer_key: &session.credentials.consumer_key,
                    consumer_secret: &session.credentials.consumer_secret,
                    token: &session.credentials.access_token,
                    token_secret: &session.credentials.access_token_secret,
                    extra_params: &[],
                };
                sign(&input, &generate_nonce(), unix_timestamp())
            })
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let mut guard = self.session.write().await;
                let mut updated = (*guard).clone();
                updated.authenticated = true;
                updated.last_used = Utc::now();
                *guard = Arc::new(updated);
                info!("OAuth session renewed");
                Ok(())
            }
            Ok(r) => {
                let status = r.status();
                self.mark_unauthenticated().await;
                self.events.emit(Event::new(
                    EventKind::TokenRenewalFailed,
                    serde_json::json!({"status": status.as_u16()}),
                ));
                bail!("renew_access_token returned {status}")
            }
            Err(err) => {
                self.mark_unauthenticated().await;
                self.events.emit(Event::new(
                    EventKind::TokenRenewalFailed,
                    serde_json::json!({"error": err.to_string()}),
                ));
                Err(err).context("renew_access_token request failed")
            }
        }
    }

    async fn mark_unauthenticated(&self) {
        let mut guard = self.session.write().await;
        let mut updated = (*guard).clone();
        updated.authenticated = false;
        *guard = Arc::new(updated);
    }

    /// Apply out-of-band rotated credentials (the renewal web UI writes
    /// to the secret store; this re-reads and swaps the session).
    pub async fn reload_from_secret_store(&self) -> Result<()> {
        let credentials = self.secret_store.load().await.context("reloading credentials")?;
        let mut guard = self.session.write().await;
        *guard = Arc::new(Session {
            credentials,
            last_used: Utc::now(),
            authenticated: true,
        });
        drop(guard);
        let _ = self.rotation_tx.send(unix_timestamp());
        self.events.emit(Event::new(EventKind::TokenRotated, serde_json::json!({})));
        info!("OAuth credentials rotated from secret store");
        Ok(())
    }

    pub fn is_idle_expired(last_used: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - last_used).num_seconds() >= IDLE_EXPIRY_SECS
    }

    /// Tokens expire at local midnight in the exchange timezone: once
    /// the calendar date has advanced past the date of last
    /// authorization, only the out-of-band three-legged flow can mint
    /// new tokens.
    pub fn is_past_daily_expiry(last_auth_date: chrono::NaiveDate, now_local_date: chrono::NaiveDate) -> bool {
        now_local_date > last_auth_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_expiry_after_two_hours() {
        let now = Utc::now();
        let last_used = now - chrono::Duration::hours(3);
        assert!(OAuthSessionManager::is_idle_expired(last_used, now));
    }

    #[test]
    fn not_idle_expired_within_window() {
        let now = Utc::now();
        let last_used = now - chrono::Duration::minutes(30);
        assert!(!OAuthSessionManager::is_idle_expired(last_used, now));
    }

    #[test]
    fn daily_expiry_crosses_calendar_date() {
        use chrono::NaiveDate;
        let last = NaiveDate::from_ymd_opt(2026, 7, 25).unwrap();
        let same_day = NaiveDate::from_ymd_opt(2026, 7, 25).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2026, 7, 26).unwrap();
        assert!(!OAuthSessionManager::is_past_daily_expiry(last, same_day));
        assert!(OAuthSessionManager::is_past_daily_expiry(last, next_day));
    }
}
