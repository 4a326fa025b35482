use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_shared::{AppError, AppResult};

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "insurance";
const TABLE: &str = "insurance_policies";
/// Premium due dates feed the upcoming-payments view.
const INVALIDATES: &[&str] = &["insurance", "schedules"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: Uuid,
    pub family_id: Uuid,
    pub provider: String,
    /// life, health, vehicle, home, ...
    pub policy_type: String,
    pub policy_number: String,
    pub sum_assured: Decimal,
    pub premium: Decimal,
    #[serde(default)]
    pub premium_due_on: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct NewInsurancePolicy {
    pub provider: String,
    pub policy_type: String,
    pub policy_number: String,
    pub sum_assured: Decimal,
    pub premium: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_due_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Serialize)]
pub struct InsurancePolicyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_due_on: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum_assured: Option<Decimal>,
}

pub struct Insurance<'a> {
    pub(crate) hub: &'a Resources,
}

impl Insurance<'_> {
    pub async fn list(&self) -> AppResult<Vec<InsurancePolicy>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<InsurancePolicy> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .select("*")
            .order("premium_due_on.asc")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    /// Policies whose premium falls due within the next `days` days.
    pub async fn premiums_due_within(&self, days: i64) -> AppResult<Vec<InsurancePolicy>> {
        let horizon = Utc::now().date_naive() + Duration::days(days);
        let policies = self.list().await?;
        Ok(policies
            .into_iter()
            .filter(|p| p.premium_due_on.map(|due| due <= horizon).unwrap_or(false))
            .collect())
    }

    pub async fn create(&self, policy: NewInsurancePolicy) -> AppResult<InsurancePolicy> {
        let scope = self.hub.scope()?;
        let written: InsurancePolicy = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .insert(&FamilyScoped {
                family_id: scope.family_id,
                row: policy,
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn update(&self, id: Uuid, patch: InsurancePolicyPatch) -> AppResult<InsurancePolicy> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<InsurancePolicy> = self
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
            .ok_or_else(|| AppError::not_found(format!("policy {id} not found")))?;
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
