//! Cache-aware wrappers over the data API, one module per domain
//! resource. Every hook resolves its bearer token and family scope from
//! the session manager's reactive snapshot and invalidates the declared
//! cache segments after each mutation.

pub mod accounts;
pub mod budgets;
pub mod documents;
pub mod family;
pub mod insurance;
pub mod investments;
pub mod lending;
pub mod loans;
pub mod monthly;
pub mod notifications;
pub mod schedules;
pub mod store;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use hearth_session::AuthState;
use hearth_shared::clients::RestClient;
use hearth_shared::{AppError, AppResult, ErrorCode};

use notifications::NotificationBus;
use store::QueryCache;

/// Resolved call scope: who is asking, on behalf of which family.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub token: String,
    pub family_id: Uuid,
    pub profile_id: Uuid,
}

/// Wraps an insert payload with the owning family id.
#[derive(Serialize)]
pub(crate) struct FamilyScoped<T: Serialize> {
    pub family_id: Uuid,
    #[serde(flatten)]
    pub row: T,
}

/// Entry point to the hooks layer. Cheap to clone; clones share the
/// cache and the notification bus.
#[derive(Clone)]
pub struct Resources {
    rest: RestClient,
    cache: QueryCache,
    state: watch::Receiver<AuthState>,
    notification_bus: NotificationBus,
}

impl Resources {
    pub fn new(rest: RestClient, state: watch::Receiver<AuthState>) -> Self {
        Self {
            rest,
            cache: QueryCache::default(),
            state,
            notification_bus: NotificationBus::new(),
        }
    }

    pub fn accounts(&self) -> accounts::Accounts<'_> {
        accounts::Accounts { hub: self }
    }

    pub fn budgets(&self) -> budgets::Budgets<'_> {
        budgets::Budgets { hub: self }
    }

    pub fn loans(&self) -> loans::Loans<'_> {
        loans::Loans { hub: self }
    }

    pub fn investments(&self) -> investments::Investments<'_> {
        investments::Investments { hub: self }
    }

    pub fn insurance(&self) -> insurance::Insurance<'_> {
        insurance::Insurance { hub: self }
    }

    pub fn lending(&self) -> lending::Lending<'_> {
        lending::Lending { hub: self }
    }

    pub fn schedules(&self) -> schedules::Schedules<'_> {
        schedules::Schedules { hub: self }
    }

    pub fn documents(&self) -> documents::Documents<'_> {
        documents::Documents { hub: self }
    }

    pub fn notifications(&self) -> notifications::Notifications<'_> {
        notifications::Notifications { hub: self }
    }

    pub fn monthly(&self) -> monthly::Monthly<'_> {
        monthly::Monthly { hub: self }
    }

    pub fn family(&self) -> family::FamilyAdmin<'_> {
        family::FamilyAdmin { hub: self }
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub(crate) fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub(crate) fn notification_bus(&self) -> &NotificationBus {
        &self.notification_bus
    }

    /// Resolve the current call scope from the reactive snapshot.
    /// Consumers must treat the error codes as render states, not
    /// failures: `SessionMissing` gates to sign-in, `FamilyMissing`
    /// means provisioning has not finished.
    pub(crate) fn scope(&self) -> AppResult<Scope> {
        let state = self.state.borrow();
        let session = state.session.as_ref().ok_or_else(AppError::session_missing)?;
        let profile = state
            .profile
            .as_ref()
            .ok_or_else(|| AppError::new(ErrorCode::ProfileMissing, "profile not resolved yet"))?;
        let family = state
            .family
            .as_ref()
            .ok_or_else(|| AppError::new(ErrorCode::FamilyMissing, "no family resolved yet"))?;
        Ok(Scope {
            token: session.access_token.clone(),
            family_id: family.id,
            profile_id: profile.id,
        })
    }

    /// Apply a module's declarative invalidation list after a mutation.
    pub(crate) async fn invalidated(&self, segments: &[&str], family_id: Uuid) {
        self.cache.invalidate_many(segments, family_id).await;
        tracing::debug!(?segments, %family_id, "cache segments invalidated");
    }
}
