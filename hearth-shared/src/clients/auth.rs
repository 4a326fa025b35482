use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, watch, Mutex};

use crate::config::RemoteConfig;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::types::auth::{AuthChange, AuthChangeEvent, Identity, OAuthProvider, Session};

const EVENT_BUS_CAPACITY: usize = 64;
const PKCE_VERIFIER_LEN: usize = 64;

/// Client for the hosted identity provider (GoTrue-style auth API).
///
/// Owns the current [`Session`] and re-emits every transition on a
/// broadcast bus as [`AuthChange`], so consumers observe sign-in,
/// sign-out, and silent token renewal as discrete events.
///
/// Cheap to clone; all clones share the same session and bus.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    session_tx: Arc<watch::Sender<Option<Session>>>,
    events: broadcast::Sender<AuthChange>,
    pkce: Arc<Mutex<Option<PkceFlow>>>,
}

struct PkceFlow {
    verifier: String,
}

impl AuthClient {
    pub fn new(config: &RemoteConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(AppError::Transport)?;
        let (session_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        Ok(Self {
            http,
            base: format!("{}/auth/v1", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            session_tx: Arc::new(session_tx),
            events,
            pkce: Arc::new(Mutex::new(None)),
        })
    }

    /// Obtain a new receiver on the auth-change bus. Each receiver gets
    /// every transition published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session_tx.borrow().clone()
    }

    /// Seed a persisted session before bootstrap. Does not emit.
    pub fn restore_session(&self, session: Session) {
        self.session_tx.send_replace(Some(session));
    }

    /// Retrieve the current session for bootstrap: validates a live
    /// token against the provider, silently renews an expired one, and
    /// resolves to `None` when either step fails.
    pub async fn get_session(&self) -> AppResult<Option<Session>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };

        if session.is_expired() {
            return match self.refresh_session().await {
                Ok(renewed) => Ok(Some(renewed)),
                Err(e) => {
                    tracing::warn!(error = %e, "stored session could not be renewed");
                    self.session_tx.send_replace(None);
                    Ok(None)
                }
            };
        }

        match self.fetch_user(&session.access_token).await {
            Ok(user) => {
                let mut session = session;
                session.user = user;
                self.session_tx.send_replace(Some(session.clone()));
                Ok(Some(session))
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored session failed validation");
                self.session_tx.send_replace(None);
                Ok(None)
            }
        }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> AppResult<Session> {
        let body = json!({
            "email": email,
            "password": password,
            "data": metadata,
        });
        let session = self
            .request_session("signup", &body, ErrorCode::EmailAlreadyRegistered)
            .await?;
        tracing::info!(user_id = %session.user.id, "user signed up");
        self.set_session(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Session> {
        let body = json!({ "email": email, "password": password });
        let session = self
            .request_session("token?grant_type=password", &body, ErrorCode::InvalidCredentials)
            .await?;
        tracing::info!(user_id = %session.user.id, "user signed in");
        self.set_session(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Ask the provider to deliver a one-time passcode to `email`.
    pub async fn sign_in_with_otp(&self, email: &str) -> AppResult<()> {
        let body = json!({ "email": email });
        let response = self
            .http
            .post(format!("{}/otp", self.base))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text, ErrorCode::ValidationError));
        }
        tracing::debug!("one-time passcode requested");
        Ok(())
    }

    pub async fn verify_otp(&self, email: &str, token: &str) -> AppResult<Session> {
        let body = json!({ "type": "email", "email": email, "token": token });
        let session = match self
            .request_session("verify", &body, ErrorCode::OtpInvalid)
            .await
        {
            Ok(session) => session,
            // The provider reports a stale code distinctly from a wrong
            // one only through the message text when both are possible.
            Err(AppError::Known { code: ErrorCode::OtpInvalid, message, details })
                if message.to_lowercase().contains("expired")
                    && !message.to_lowercase().contains("invalid") =>
            {
                return Err(AppError::Known {
                    code: ErrorCode::OtpExpired,
                    message,
                    details,
                });
            }
            Err(e) => return Err(e),
        };
        tracing::info!(user_id = %session.user.id, "otp verified");
        self.set_session(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Build the provider authorization URL for an OAuth sign-in.
    ///
    /// The PKCE verifier and `state` nonce are held until
    /// [`exchange_code`](Self::exchange_code) completes the callback leg.
    pub async fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> AppResult<String> {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PKCE_VERIFIER_LEN)
            .map(char::from)
            .collect();
        let challenge = pkce_challenge(&verifier);
        let state = uuid::Uuid::new_v4().to_string();

        let url = reqwest::Url::parse_with_params(
            &format!("{}/authorize", self.base),
            &[
                ("provider", provider.to_string().as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "s256"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| AppError::new(ErrorCode::OAuthExchangeFailed, format!("authorize url: {e}")))?;

        *self.pkce.lock().await = Some(PkceFlow { verifier });
        Ok(url.to_string())
    }

    /// Exchange the code carried by the OAuth callback for a session.
    pub async fn exchange_code(&self, code: &str) -> AppResult<Session> {
        let flow = self.pkce.lock().await.take().ok_or_else(|| {
            AppError::new(ErrorCode::OAuthExchangeFailed, "no oauth flow in progress")
        })?;

        let body = json!({ "auth_code": code, "code_verifier": flow.verifier });
        let session = self
            .request_session("token?grant_type=pkce", &body, ErrorCode::OAuthExchangeFailed)
            .await?;
        tracing::info!(
            user_id = %session.user.id,
            provider = session.user.provider(),
            "oauth sign-in completed"
        );
        self.set_session(Some(session.clone()), AuthChangeEvent::SignedIn);
        Ok(session)
    }

    /// Silent token renewal. Emits `token_refreshed`, never `signed_in`.
    pub async fn refresh_session(&self) -> AppResult<Session> {
        let current = self.current_session().ok_or_else(AppError::session_missing)?;
        let body = json!({ "refresh_token": current.refresh_token });
        let session = self
            .request_session("token?grant_type=refresh_token", &body, ErrorCode::SessionExpired)
            .await?;
        tracing::debug!(user_id = %session.user.id, "session refreshed");
        self.set_session(Some(session.clone()), AuthChangeEvent::TokenRefreshed);
        Ok(session)
    }

    /// Revoke the session remotely and clear local state. Remote failure
    /// is logged; the caller always observes a signed-out client.
    pub async fn sign_out(&self) {
        if let Some(session) = self.current_session() {
            let result = self
                .http
                .post(format!("{}/logout", self.base))
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = %response.status(), "remote sign-out rejected");
                }
                Err(e) => tracing::warn!(error = %e, "remote sign-out failed"),
                _ => {}
            }
        }
        self.set_session(None, AuthChangeEvent::SignedOut);
        tracing::info!("signed out");
    }

    pub async fn reset_password_for_email(&self, email: &str) -> AppResult<()> {
        let body = json!({ "email": email });
        let response = self
            .http
            .post(format!("{}/recover", self.base))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text, ErrorCode::ValidationError));
        }
        tracing::debug!("password recovery requested");
        Ok(())
    }

    pub async fn update_password(&self, new_password: &str) -> AppResult<()> {
        let current = self.current_session().ok_or_else(AppError::session_missing)?;
        let body = json!({ "password": new_password });
        let response = self
            .http
            .put(format!("{}/user", self.base))
            .header("apikey", &self.api_key)
            .bearer_auth(&current.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text, ErrorCode::ValidationError));
        }

        let user: Identity = response
            .json()
            .await
            .map_err(|e| AppError::new(ErrorCode::DecodeError, format!("user decode: {e}")))?;
        let mut session = current;
        session.user = user;
        self.set_session(Some(session), AuthChangeEvent::UserUpdated);
        tracing::info!("password updated");
        Ok(())
    }

    // --- Internals ---

    async fn fetch_user(&self, access_token: &str) -> AppResult<Identity> {
        let response = self
            .http
            .get(format!("{}/user", self.base))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text, ErrorCode::SessionExpired));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::new(ErrorCode::DecodeError, format!("user decode: {e}")))
    }

    async fn request_session(
        &self,
        path: &str,
        body: &serde_json::Value,
        fallback: ErrorCode,
    ) -> AppResult<Session> {
        let response = self
            .http
            .post(format!("{}/{path}", self.base))
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text, fallback));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::new(ErrorCode::DecodeError, format!("session decode: {e}")))
    }

    fn set_session(&self, session: Option<Session>, event: AuthChangeEvent) {
        self.session_tx.send_replace(session.clone());
        // broadcast::send errs only with zero receivers, which is normal
        // before the session manager attaches.
        let _ = self.events.send(AuthChange { event, session });
    }
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn auth_error(status: reqwest::StatusCode, body: &str, fallback: ErrorCode) -> AppError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|k| v.get(k).and_then(|m| m.as_str()).map(String::from))
        })
        .unwrap_or_else(|| format!("auth request failed with status {status}"));

    let code = if status.is_server_error() {
        ErrorCode::ServiceUnavailable
    } else {
        fallback
    };
    AppError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn client() -> AuthClient {
        AuthClient::new(&RemoteConfig::for_url("http://localhost:54321", "key")).expect("client")
    }

    fn session() -> Session {
        Session {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            token_type: "bearer".into(),
            expires_in: 3600,
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: Identity {
                id: uuid::Uuid::new_v4(),
                email: Some("a@x.com".into()),
                app_metadata: serde_json::json!({"provider": "email"}),
                user_metadata: serde_json::json!({}),
                created_at: None,
                last_sign_in_at: None,
            },
        }
    }

    #[test]
    fn pkce_challenge_vector() {
        // SHA-256("test"), base64url without padding.
        assert_eq!(
            pkce_challenge("test"),
            "n4bQgYhMfWWaL-qgxVrQFaO_TxsrC4Is0V1sFbDwCgg"
        );
    }

    #[test]
    fn auth_error_prefers_provider_message() {
        let err = auth_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error_description":"Invalid login credentials"}"#,
            ErrorCode::InvalidCredentials,
        );
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(err.code(), Some(ErrorCode::InvalidCredentials));

        let err = auth_error(
            reqwest::StatusCode::BAD_GATEWAY,
            "",
            ErrorCode::InvalidCredentials,
        );
        assert_eq!(err.code(), Some(ErrorCode::ServiceUnavailable));
    }

    #[tokio::test]
    async fn bus_fanout_on_sign_out() {
        let auth = client();
        let mut rx1 = auth.subscribe();
        let mut rx2 = auth.subscribe();

        // No stored session: sign_out skips the network and only emits.
        auth.sign_out().await;

        let c1 = rx1.recv().await.unwrap();
        let c2 = rx2.recv().await.unwrap();
        assert_eq!(c1.event, AuthChangeEvent::SignedOut);
        assert_eq!(c2.event, AuthChangeEvent::SignedOut);
        assert!(c1.session.is_none());
    }

    #[tokio::test]
    async fn restore_session_does_not_emit() {
        let auth = client();
        let mut rx = auth.subscribe();
        auth.restore_session(session());
        assert!(auth.current_session().is_some());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn exchange_without_flow_is_rejected() {
        let auth = client();
        let err = auth.exchange_code("code").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::OAuthExchangeFailed));
    }
}
