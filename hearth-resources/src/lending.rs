use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use hearth_shared::{AppError, AppResult};

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "lending";
const TABLE: &str = "lendings";
const INVALIDATES: &[&str] = &["lending"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LendDirection {
    /// Money we lent out.
    Lent,
    /// Money we borrowed.
    Borrowed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalLending {
    pub id: Uuid,
    pub family_id: Uuid,
    pub counterparty: String,
    pub direction: LendDirection,
    pub amount: Decimal,
    #[serde(default)]
    pub lent_on: Option<NaiveDate>,
    #[serde(default)]
    pub due_on: Option<NaiveDate>,
    #[serde(default)]
    pub settled: bool,
}

#[derive(Debug, Serialize)]
pub struct NewPersonalLending {
    pub counterparty: String,
    pub direction: LendDirection,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lent_on: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Serialize)]
pub struct PersonalLendingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<NaiveDate>,
}

pub struct Lending<'a> {
    pub(crate) hub: &'a Resources,
}

impl Lending<'_> {
    pub async fn list(&self) -> AppResult<Vec<PersonalLending>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<PersonalLending> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .select("*")
            .order("due_on.asc")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    pub async fn create(&self, lending: NewPersonalLending) -> AppResult<PersonalLending> {
        let scope = self.hub.scope()?;
        let written: PersonalLending = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .insert(&FamilyScoped {
                family_id: scope.family_id,
                row: lending,
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn update(&self, id: Uuid, patch: PersonalLendingPatch) -> AppResult<PersonalLending> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<PersonalLending> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .eq("family_id", scope.family_id)
            .update(&patch)
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| AppError::not_found(format!("lending {id} not found")))?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(updated)
    }

    pub async fn mark_settled(&self, id: Uuid) -> AppResult<PersonalLending> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<PersonalLending> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .eq("family_id", scope.family_id)
            .update(&json!({ "settled": true }))
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| AppError::not_found(format!("lending {id} not found")))?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(updated)
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
