use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_shared::AppResult;

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "documents";
const TABLE: &str = "documents";
const INVALIDATES: &[&str] = &["documents"];

/// Metadata record for a stored document; the file itself lives in the
/// hosted object store and is addressed by `storage_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub family_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    pub storage_path: String,
    pub uploaded_by: Uuid,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct NewDocumentRecord<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    storage_path: &'a str,
    uploaded_by: Uuid,
}

pub struct Documents<'a> {
    pub(crate) hub: &'a Resources,
}

impl Documents<'_> {
    pub async fn list(&self) -> AppResult<Vec<DocumentRecord>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<DocumentRecord> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .select("*")
            .order("created_at.desc")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    pub async fn create(
        &self,
        title: &str,
        category: Option<&str>,
        storage_path: &str,
    ) -> AppResult<DocumentRecord> {
        let scope = self.hub.scope()?;
        let written: DocumentRecord = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .insert(&FamilyScoped {
                family_id: scope.family_id,
                row: NewDocumentRecord {
                    title,
                    category,
                    storage_path,
                    uploaded_by: scope.profile_id,
                },
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let scope = self.hub.scope()?;
        self.hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .eq("family_id", scope.family_id)
            .delete()
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(())
    }
}
