use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
    Viewer,
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Admin => write!(f, "admin"),
            MemberRole::Member => write!(f, "member"),
            MemberRole::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            "viewer" => Ok(MemberRole::Viewer),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

// --- User profiles ---

/// The application's own user record, one-to-one with an [`super::Identity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub auth_user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub mobile: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct NewUserProfile {
    pub auth_user_id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

// --- Families ---

/// A household grouping that owns all financial records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_by: Uuid,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// --- Family memberships ---

/// Join record granting a [`UserProfile`] a role within a [`Family`].
///
/// Reads request the family embedded (`select=*,families(*)`), so the
/// joined row arrives under the `families` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyMembership {
    pub id: Uuid,
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub relationship: String,
    #[serde(default)]
    pub permissions: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "families", default)]
    pub family: Option<Family>,
}

#[derive(Debug, Serialize)]
pub struct NewFamilyMembership {
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub relationship: String,
}

// --- Invitations ---

/// A pending offer for an email address to join a specific family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyInvitation {
    pub id: Uuid,
    pub family_id: Uuid,
    pub email: String,
    pub role: MemberRole,
    pub relationship: String,
    pub status: InvitationStatus,
    pub invited_by: Uuid,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct NewFamilyInvitation {
    pub family_id: Uuid,
    pub email: String,
    pub role: MemberRole,
    pub relationship: String,
    pub status: InvitationStatus,
    pub invited_by: Uuid,
}

/// Result of the `create_family_for_user` remote procedure.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionedFamily {
    pub family_id: Uuid,
    pub family_name: String,
    pub member_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        assert_eq!("admin".parse::<MemberRole>().unwrap(), MemberRole::Admin);
        assert_eq!(MemberRole::Viewer.to_string(), "viewer");
        assert!("owner".parse::<MemberRole>().is_err());
    }

    #[test]
    fn membership_deserializes_embedded_family() {
        let family_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "family_id": family_id,
            "user_id": Uuid::new_v4(),
            "role": "admin",
            "relationship": "Self",
            "families": {
                "id": family_id,
                "name": "Ann's Family",
                "owner_id": Uuid::new_v4(),
                "created_by": Uuid::new_v4(),
            }
        });
        let membership: FamilyMembership = serde_json::from_value(raw).unwrap();
        assert_eq!(membership.role, MemberRole::Admin);
        let family = membership.family.expect("embedded family");
        assert_eq!(family.name, "Ann's Family");
        assert_eq!(family.id, family_id);
    }

    #[test]
    fn membership_tolerates_missing_embed() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "family_id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
            "role": "member",
            "relationship": "Spouse",
        });
        let membership: FamilyMembership = serde_json::from_value(raw).unwrap();
        assert!(membership.family.is_none());
    }
}
