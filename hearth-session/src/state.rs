use hearth_shared::{Family, FamilyMembership, Identity, Session, UserProfile};

/// The process-wide reactive snapshot published on the session manager's
/// watch channel. Mutated only by the manager's own tasks; everyone else
/// reads it and requests changes through the manager's operations.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub session: Option<Session>,
    pub identity: Option<Identity>,
    pub profile: Option<UserProfile>,
    pub family: Option<Family>,
    pub membership: Option<FamilyMembership>,
    pub is_loading: bool,
}

/// Classification of a snapshot once loading has finished. Exactly one
/// variant holds for any settled snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettledState {
    Unauthenticated,
    /// Signed in, but no application profile could be resolved. A
    /// user-actionable failure, not a loading state.
    NoProfile,
    /// Signed in with a profile, but no family membership yet.
    NoFamily,
    Ready,
}

impl AuthState {
    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Default::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// `None` while loading; otherwise the single settled classification.
    pub fn settled(&self) -> Option<SettledState> {
        if self.is_loading {
            return None;
        }
        Some(if self.session.is_none() {
            SettledState::Unauthenticated
        } else if self.profile.is_none() {
            SettledState::NoProfile
        } else if self.membership.is_none() || self.family.is_none() {
            SettledState::NoFamily
        } else {
            SettledState::Ready
        })
    }
}
