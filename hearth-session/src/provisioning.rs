use serde_json::json;

use hearth_shared::clients::RestClient;
use hearth_shared::{
    AppError, AppResult, ErrorCode, FamilyInvitation, FamilyMembership, Identity,
    NewFamilyMembership, NewUserProfile, ProvisionedFamily, UserProfile,
};

use crate::lookups;

/// Create the application profile for an identity that has none, e.g. a
/// first-time OAuth sign-in. Name and email come from provider metadata.
pub(crate) async fn create_profile_for_identity(
    rest: &RestClient,
    token: &str,
    identity: &Identity,
) -> AppResult<UserProfile> {
    let email = identity.email_normalized().ok_or_else(|| {
        AppError::new(ErrorCode::ProfileCreateFailed, "identity carries no email")
    })?;

    let profile = create_profile(
        rest,
        token,
        NewUserProfile {
            auth_user_id: identity.id,
            email,
            full_name: identity.display_name(),
            mobile: None,
        },
    )
    .await?;
    tracing::info!(
        profile_id = %profile.id,
        provider = identity.provider(),
        "profile provisioned for identity"
    );
    Ok(profile)
}

pub(crate) async fn create_profile(
    rest: &RestClient,
    token: &str,
    new_profile: NewUserProfile,
) -> AppResult<UserProfile> {
    rest.table("users").bearer(token).insert(&new_profile).await
}

/// Guarantee the profile has a home membership: consume a pending
/// invitation when one matches the profile's email, otherwise provision
/// a fresh family. Idempotent; an existing membership short-circuits.
pub(crate) async fn ensure_family(
    rest: &RestClient,
    token: &str,
    profile: &UserProfile,
) -> AppResult<()> {
    if lookups::membership_for_profile(rest, token, profile.id)
        .await?
        .is_some()
    {
        tracing::debug!(profile_id = %profile.id, "membership already present; skipping provisioning");
        return Ok(());
    }

    match lookups::pending_invitation_for_email(rest, token, &profile.email).await? {
        Some(invitation) => accept_invitation(rest, token, &invitation, profile).await,
        None => {
            let provisioned = create_family(rest, token, profile).await?;
            tracing::info!(
                family_id = %provisioned.family_id,
                family_name = %provisioned.family_name,
                "family provisioned"
            );
            Ok(())
        }
    }
}

/// Consume a pending invitation exactly once: the status flip is filtered
/// on `status = pending`, so a concurrent consumer wins at most one claim;
/// the membership row is only written by the claimant.
async fn accept_invitation(
    rest: &RestClient,
    token: &str,
    invitation: &FamilyInvitation,
    profile: &UserProfile,
) -> AppResult<()> {
    let claimed: Vec<FamilyInvitation> = rest
        .table("family_invitations")
        .bearer(token)
        .eq("id", invitation.id)
        .eq("status", "pending")
        .update(&json!({ "status": "accepted" }))
        .await?;

    if claimed.is_empty() {
        tracing::warn!(
            invitation_id = %invitation.id,
            "invitation was already consumed"
        );
        return Ok(());
    }

    let membership: FamilyMembership = rest
        .table("family_members")
        .bearer(token)
        .insert(&NewFamilyMembership {
            family_id: invitation.family_id,
            user_id: profile.id,
            role: invitation.role,
            relationship: invitation.relationship.clone(),
        })
        .await?;

    tracing::info!(
        membership_id = %membership.id,
        family_id = %invitation.family_id,
        role = %invitation.role,
        "invitation accepted"
    );
    Ok(())
}

async fn create_family(
    rest: &RestClient,
    token: &str,
    profile: &UserProfile,
) -> AppResult<ProvisionedFamily> {
    let family_name = format!("{}'s Family", profile.full_name);
    rest.rpc(
        "create_family_for_user",
        &json!({ "user_id": profile.id, "family_name": family_name }),
        token,
    )
    .await
}
