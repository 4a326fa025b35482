use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

use hearth_shared::clients::{AuthClient, RestClient};
use hearth_shared::{
    AppError, AppResult, AuthChange, AuthChangeEvent, ErrorCode, Identity, OAuthProvider, Session,
    UserProfile,
};

use crate::config::BootstrapConfig;
use crate::retry::fetch_with_retry;
use crate::state::AuthState;
use crate::{lookups, provisioning};

/// What started a resolution pass. Only a sign-in transition is allowed
/// to provision missing records; bootstrap and manual refreshes surface
/// the gap instead (a reload must not re-create a half-provisioned
/// family it merely failed to read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveTrigger {
    Bootstrap,
    SignIn,
    Manual,
}

impl ResolveTrigger {
    fn allows_provisioning(self) -> bool {
        matches!(self, ResolveTrigger::SignIn)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignUpInput {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub mobile: Option<String>,
}

/// Owns the reactive `{session, identity, profile, family, membership,
/// is_loading}` snapshot and keeps it consistent with the identity
/// provider: resolves the signed-in identity to a profile and family
/// membership, provisions whichever is missing on first sign-in, and
/// exposes the sign-in/up/out operation surface.
///
/// On `start` it subscribes to the auth-change bus before issuing the
/// initial session retrieval, so no transition is lost to that race;
/// the per-identity in-flight set keeps overlapping triggers from
/// provisioning the same identity twice.
pub struct SessionManager {
    inner: Arc<Inner>,
    listener: JoinHandle<()>,
    bootstrap: JoinHandle<()>,
}

struct Inner {
    auth: AuthClient,
    rest: RestClient,
    cfg: BootstrapConfig,
    state: watch::Sender<AuthState>,
    provisioning: Mutex<HashSet<Uuid>>,
}

impl Inner {
    /// One watch notification per settled async step.
    fn publish(&self, mutate: impl FnOnce(&mut AuthState)) {
        self.state.send_modify(mutate);
    }

    fn reset_unauthenticated(&self) {
        self.state.send_replace(AuthState {
            is_loading: false,
            ..Default::default()
        });
    }

    fn try_begin_provisioning(&self, identity_id: Uuid) -> bool {
        self.guard_set().insert(identity_id)
    }

    fn is_provisioning(&self, identity_id: Uuid) -> bool {
        self.guard_set().contains(&identity_id)
    }

    fn end_provisioning(&self, identity_id: Uuid) {
        self.guard_set().remove(&identity_id);
    }

    fn guard_set(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the provisioning slot even when the owning future is
/// cancelled by the ready ceiling.
struct ProvisionSlot<'a> {
    inner: &'a Arc<Inner>,
    identity_id: Uuid,
}

impl Drop for ProvisionSlot<'_> {
    fn drop(&mut self) {
        self.inner.end_provisioning(self.identity_id);
    }
}

impl SessionManager {
    /// Spawn the auth-change listener and the initial bootstrap pass.
    /// The snapshot starts in the loading state and is guaranteed to
    /// leave it within the configured ready ceiling.
    pub fn start(auth: AuthClient, rest: RestClient, cfg: BootstrapConfig) -> Self {
        let (state, _) = watch::channel(AuthState::loading());
        let inner = Arc::new(Inner {
            auth,
            rest,
            cfg,
            state,
            provisioning: Mutex::new(HashSet::new()),
        });

        // Subscribe before the initial retrieval so a sign-in landing
        // mid-bootstrap is observed rather than lost.
        let changes = inner.auth.subscribe();
        let listener = tokio::spawn(Self::run_listener(inner.clone(), changes));
        let bootstrap = tokio::spawn(Self::run_bootstrap(inner.clone()));

        Self {
            inner,
            listener,
            bootstrap,
        }
    }

    /// Receiver for the reactive snapshot. Route guards and resource
    /// hooks read this; nothing outside the manager writes it.
    pub fn state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Stop the listener and any in-flight bootstrap; no state write can
    /// happen after this returns.
    pub fn close(self) {
        self.listener.abort();
        self.bootstrap.abort();
        tracing::debug!("session manager closed");
    }

    // --- Operations ---

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<()> {
        let email = normalize_email(email);
        self.inner
            .auth
            .sign_in_with_password(&email, password)
            .await?;
        Ok(())
    }

    pub async fn sign_in_with_otp(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        self.inner.auth.sign_in_with_otp(&email).await
    }

    pub async fn verify_otp(&self, email: &str, code: &str) -> AppResult<()> {
        let email = normalize_email(email);
        self.inner.auth.verify_otp(&email, code).await?;
        Ok(())
    }

    /// Begin the OAuth leg: returns the provider authorization URL for
    /// the caller to open. Control returns via [`complete_oauth`].
    ///
    /// [`complete_oauth`]: Self::complete_oauth
    pub async fn sign_in_with_google(&self, redirect_to: &str) -> AppResult<String> {
        self.inner
            .auth
            .authorize_url(OAuthProvider::Google, redirect_to)
            .await
    }

    /// Finish the OAuth callback. First-time identities get a profile
    /// and family provisioned by the resolution pass this triggers.
    pub async fn complete_oauth(&self, code: &str) -> AppResult<()> {
        self.inner.auth.exchange_code(code).await?;
        Ok(())
    }

    /// Create an account end to end: identity, profile, and either the
    /// invited family or a fresh one. Rejects emails that already have a
    /// profile; a profile-creation failure after the identity exists is
    /// reported distinctly so the user can recover by signing in.
    pub async fn sign_up(&self, input: SignUpInput) -> AppResult<()> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        validate_password(&input.password)?;
        let email = normalize_email(&input.email);

        if lookups::profile_by_email(&self.inner.rest, &email)
            .await?
            .is_some()
        {
            return Err(AppError::new(
                ErrorCode::AlreadyMember,
                "You are already a member. Please login.",
            ));
        }

        let metadata = json!({ "full_name": input.full_name });
        let session = self.inner.auth.sign_up(&email, &input.password, metadata).await?;
        let token = session.access_token.clone();

        // Hold the slot across profile + family creation so the
        // concurrent signed-in transition defers to this sequence.
        let slot = self
            .inner
            .try_begin_provisioning(session.user.id)
            .then(|| ProvisionSlot {
                inner: &self.inner,
                identity_id: session.user.id,
            });

        let profile = provisioning::create_profile(
            &self.inner.rest,
            &token,
            hearth_shared::NewUserProfile {
                auth_user_id: session.user.id,
                email,
                full_name: input.full_name.trim().to_string(),
                mobile: input.mobile,
            },
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "profile creation failed after sign-up");
            AppError::new(
                ErrorCode::ProfileCreateFailed,
                "account created but profile setup failed; please sign in to retry",
            )
        })?;

        if let Err(e) = provisioning::ensure_family(&self.inner.rest, &token, &profile).await {
            tracing::error!(error = %e, profile_id = %profile.id, "family provisioning failed");
        }
        drop(slot);

        Self::resolve(&self.inner, session, ResolveTrigger::SignIn).await;
        Ok(())
    }

    /// Clears the session and every derived field. Remote failures are
    /// absorbed; the caller always ends up signed out.
    pub async fn sign_out(&self) {
        self.inner.auth.sign_out().await;
    }

    pub async fn reset_password(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        self.inner.auth.reset_password_for_email(&email).await
    }

    pub async fn update_password(&self, new_password: &str) -> AppResult<()> {
        validate_password(new_password)?;
        self.inner.auth.update_password(new_password).await
    }

    /// Explicit silent renewal; the resulting `token_refreshed`
    /// transition updates the session without re-fetching profile or
    /// family.
    pub async fn refresh_session(&self) -> AppResult<()> {
        self.inner.auth.refresh_session().await?;
        Ok(())
    }

    /// Re-run profile (and family) resolution for the current session.
    /// No-op when signed out.
    pub async fn refresh_user_profile(&self) -> AppResult<()> {
        let Some(session) = self.inner.auth.current_session() else {
            return Ok(());
        };
        Self::resolve(&self.inner, session, ResolveTrigger::Manual).await;
        Ok(())
    }

    /// Re-run the family resolution step for the resolved profile.
    /// No-op when signed out.
    pub async fn refresh_family(&self) -> AppResult<()> {
        let Some(session) = self.inner.auth.current_session() else {
            return Ok(());
        };
        let profile = self.inner.state.borrow().profile.clone();
        match profile {
            Some(profile) => {
                Self::resolve_family(
                    &self.inner,
                    &session.access_token,
                    session.user.id,
                    profile,
                    ResolveTrigger::Manual,
                )
                .await
            }
            None => Self::resolve(&self.inner, session, ResolveTrigger::Manual).await,
        }
        Ok(())
    }

    // --- Bootstrap ---

    async fn run_bootstrap(inner: Arc<Inner>) {
        let ceiling = inner.cfg.ready_ceiling();
        if tokio::time::timeout(ceiling, Self::initialize(&inner))
            .await
            .is_err()
        {
            tracing::warn!(
                ceiling_ms = inner.cfg.ready_ceiling_ms,
                "initial resolution exceeded the ready ceiling; forcing loading off"
            );
            inner.publish(|s| s.is_loading = false);
        }
    }

    async fn initialize(inner: &Arc<Inner>) {
        match inner.auth.get_session().await {
            Ok(Some(session)) => {
                Self::resolve(inner, session, ResolveTrigger::Bootstrap).await;
            }
            Ok(None) => inner.reset_unauthenticated(),
            Err(e) => {
                tracing::warn!(error = %e, "session retrieval failed");
                inner.reset_unauthenticated();
            }
        }
    }

    // --- Auth-change listener ---

    async fn run_listener(inner: Arc<Inner>, mut changes: broadcast::Receiver<AuthChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => Self::handle_change(&inner, change).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth-change bus lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_change(inner: &Arc<Inner>, change: AuthChange) {
        tracing::debug!(event = %change.event, "auth change received");
        match (change.event, change.session) {
            (AuthChangeEvent::SignedOut, _) | (_, None) => inner.reset_unauthenticated(),
            (AuthChangeEvent::SignedIn, Some(session)) => {
                Self::resolve(inner, session, ResolveTrigger::SignIn).await;
            }
            // A silent renewal replaces the session and deliberately
            // skips profile/family re-fetch.
            (AuthChangeEvent::TokenRefreshed, Some(session))
            | (AuthChangeEvent::UserUpdated, Some(session))
            | (AuthChangeEvent::PasswordRecovery, Some(session)) => {
                inner.publish(|s| {
                    s.identity = Some(session.user.clone());
                    s.session = Some(session);
                });
            }
        }
    }

    // --- Resolution state machine ---

    async fn resolve(inner: &Arc<Inner>, session: Session, trigger: ResolveTrigger) {
        let identity = session.user.clone();
        let token = session.access_token.clone();

        inner.publish(|s| {
            s.session = Some(session);
            s.identity = Some(identity.clone());
            s.profile = None;
            s.family = None;
            s.membership = None;
            s.is_loading = true;
        });

        let profile = fetch_with_retry("user profile", &inner.cfg, || {
            lookups::profile_by_identity(&inner.rest, &token, identity.id)
        })
        .await;

        let profile = match profile {
            Some(profile) => profile,
            None if trigger.allows_provisioning() && identity.is_oauth() => {
                match Self::provision_identity(inner, &token, &identity).await {
                    Some(profile) => profile,
                    // Either another trigger owns provisioning (it will
                    // publish the outcome) or provisioning failed and the
                    // no-profile settle already happened.
                    None => return,
                }
            }
            None => {
                if inner.is_provisioning(identity.id) {
                    tracing::debug!(identity_id = %identity.id, "provisioning in flight; deferring");
                    return;
                }
                inner.publish(|s| {
                    s.profile = None;
                    s.family = None;
                    s.membership = None;
                    s.is_loading = false;
                });
                return;
            }
        };

        Self::resolve_family(inner, &token, identity.id, profile, trigger).await;
    }

    async fn resolve_family(
        inner: &Arc<Inner>,
        token: &str,
        identity_id: Uuid,
        profile: UserProfile,
        trigger: ResolveTrigger,
    ) {
        let mut membership = fetch_with_retry("family membership", &inner.cfg, || {
            lookups::membership_for_profile(&inner.rest, token, profile.id)
        })
        .await;

        if membership.is_none() && trigger.allows_provisioning() {
            if !inner.try_begin_provisioning(identity_id) {
                tracing::debug!(identity_id = %identity_id, "family provisioning in flight; deferring");
                return;
            }
            let slot = ProvisionSlot {
                inner,
                identity_id,
            };
            if let Err(e) = provisioning::ensure_family(&inner.rest, token, &profile).await {
                tracing::error!(error = %e, profile_id = %profile.id, "family provisioning failed");
            }
            drop(slot);

            membership = fetch_with_retry("family membership", &inner.cfg, || {
                lookups::membership_for_profile(&inner.rest, token, profile.id)
            })
            .await;
        } else if membership.is_none() && inner.is_provisioning(identity_id) {
            tracing::debug!(identity_id = %identity_id, "family provisioning in flight; deferring");
            return;
        }

        let family = match &membership {
            Some(m) => match m.family.clone() {
                Some(family) => Some(family),
                None => {
                    let family_id = m.family_id;
                    fetch_with_retry("family", &inner.cfg, || {
                        lookups::family_by_id(&inner.rest, token, family_id)
                    })
                    .await
                }
            },
            None => None,
        };

        inner.publish(|s| {
            s.profile = Some(profile);
            s.membership = membership;
            s.family = family;
            s.is_loading = false;
        });
    }

    /// First-time OAuth identity: create the profile, then the family,
    /// under the per-identity slot. Returns the profile when this call
    /// owned provisioning and it succeeded.
    async fn provision_identity(
        inner: &Arc<Inner>,
        token: &str,
        identity: &Identity,
    ) -> Option<UserProfile> {
        if !inner.try_begin_provisioning(identity.id) {
            tracing::debug!(identity_id = %identity.id, "identity provisioning in flight; deferring");
            return None;
        }
        let slot = ProvisionSlot {
            inner,
            identity_id: identity.id,
        };

        let profile = match provisioning::create_profile_for_identity(&inner.rest, token, identity).await
        {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!(error = %e, identity_id = %identity.id, "identity provisioning failed");
                drop(slot);
                inner.publish(|s| {
                    s.profile = None;
                    s.family = None;
                    s.membership = None;
                    s.is_loading = false;
                });
                return None;
            }
        };

        if let Err(e) = provisioning::ensure_family(&inner.rest, token, &profile).await {
            tracing::error!(error = %e, profile_id = %profile.id, "family provisioning failed");
        }
        drop(slot);
        Some(profile)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.listener.abort();
        self.bootstrap.abort();
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < 8 {
        return Err(AppError::new(
            ErrorCode::PasswordTooWeak,
            "password must be at least 8 characters",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::new(
            ErrorCode::PasswordTooWeak,
            "password must contain at least one number",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::new(
            ErrorCode::PasswordTooWeak,
            "password must contain at least one letter",
        ));
    }
    Ok(())
}
