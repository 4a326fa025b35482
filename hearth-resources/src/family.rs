use serde_json::json;
use uuid::Uuid;

use hearth_shared::{
    AppError, AppResult, Family, FamilyInvitation, FamilyMembership, InvitationStatus, MemberRole,
    NewFamilyInvitation,
};

use crate::store::QueryKey;
use crate::Resources;

const MEMBERS: &str = "family_members";
const INVITATIONS: &str = "invitations";
const INVALIDATES: &[&str] = &["family_members", "invitations"];

/// Household administration: member roster, invitations, roles.
pub struct FamilyAdmin<'a> {
    pub(crate) hub: &'a Resources,
}

impl FamilyAdmin<'_> {
    pub async fn members(&self) -> AppResult<Vec<FamilyMembership>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(MEMBERS, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<FamilyMembership> = self
            .hub
            .rest()
            .table("family_members")
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .select("*")
            .order("created_at.asc")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    /// Offer `email` a place in the family. The invitation stays pending
    /// until that address signs up or signs in.
    pub async fn invite(
        &self,
        email: &str,
        role: MemberRole,
        relationship: &str,
    ) -> AppResult<FamilyInvitation> {
        let scope = self.hub.scope()?;
        let email = email.trim().to_lowercase();

        let duplicate: Option<FamilyInvitation> = self
            .hub
            .rest()
            .table("family_invitations")
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("email", &email)
            .eq("status", "pending")
            .fetch_optional()
            .await?;
        if duplicate.is_some() {
            return Err(AppError::new(
                hearth_shared::ErrorCode::Conflict,
                format!("{email} already has a pending invitation"),
            ));
        }

        let written: FamilyInvitation = self
            .hub
            .rest()
            .table("family_invitations")
            .bearer(&scope.token)
            .insert(&NewFamilyInvitation {
                family_id: scope.family_id,
                email,
                role,
                relationship: relationship.to_string(),
                status: InvitationStatus::Pending,
                invited_by: scope.profile_id,
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn pending_invitations(&self) -> AppResult<Vec<FamilyInvitation>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(INVITATIONS, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<FamilyInvitation> = self
            .hub
            .rest()
            .table("family_invitations")
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("status", "pending")
            .select("*")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    pub async fn update_member_role(
        &self,
        member_id: Uuid,
        role: MemberRole,
    ) -> AppResult<FamilyMembership> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<FamilyMembership> = self
            .hub
            .rest()
            .table("family_members")
            .bearer(&scope.token)
            .eq("id", member_id)
            .eq("family_id", scope.family_id)
            .update(&json!({ "role": role }))
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| AppError::not_found(format!("member {member_id} not found")))?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(updated)
    }

    pub async fn remove_member(&self, member_id: Uuid) -> AppResult<()> {
        let scope = self.hub.scope()?;
        self.hub
            .rest()
            .table("family_members")
            .bearer(&scope.token)
            .eq("id", member_id)
            .eq("family_id", scope.family_id)
            .delete()
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(())
    }

    pub async fn rename(&self, name: &str) -> AppResult<Family> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<Family> = self
            .hub
            .rest()
            .table("families")
            .bearer(&scope.token)
            .eq("id", scope.family_id)
            .update(&json!({ "name": name }))
            .await?;
        rows.pop()
            .ok_or_else(|| AppError::not_found("family not found"))
    }
}
