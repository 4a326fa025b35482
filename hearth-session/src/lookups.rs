use uuid::Uuid;

use hearth_shared::clients::RestClient;
use hearth_shared::{AppResult, Family, FamilyInvitation, FamilyMembership, UserProfile};

pub(crate) async fn profile_by_identity(
    rest: &RestClient,
    token: &str,
    auth_user_id: Uuid,
) -> AppResult<Option<UserProfile>> {
    rest.table("users")
        .bearer(token)
        .eq("auth_user_id", auth_user_id)
        .select("*")
        .fetch_optional()
        .await
}

/// Pre-auth existence check used by sign-up; runs on the anon key.
pub(crate) async fn profile_by_email(
    rest: &RestClient,
    email: &str,
) -> AppResult<Option<UserProfile>> {
    rest.table("users")
        .eq("email", email)
        .select("*")
        .fetch_optional()
        .await
}

/// Home membership lookup, family embedded. The schema permits several
/// memberships per user; the oldest one is the home family.
pub(crate) async fn membership_for_profile(
    rest: &RestClient,
    token: &str,
    user_id: Uuid,
) -> AppResult<Option<FamilyMembership>> {
    rest.table("family_members")
        .bearer(token)
        .eq("user_id", user_id)
        .select("*,families(*)")
        .order("created_at.asc")
        .fetch_optional()
        .await
}

pub(crate) async fn family_by_id(
    rest: &RestClient,
    token: &str,
    family_id: Uuid,
) -> AppResult<Option<Family>> {
    rest.table("families")
        .bearer(token)
        .eq("id", family_id)
        .select("*")
        .fetch_optional()
        .await
}

pub(crate) async fn pending_invitation_for_email(
    rest: &RestClient,
    token: &str,
    email: &str,
) -> AppResult<Option<FamilyInvitation>> {
    rest.table("family_invitations")
        .bearer(token)
        .eq("email", email)
        .eq("status", "pending")
        .order("created_at.asc")
        .fetch_optional()
        .await
}
