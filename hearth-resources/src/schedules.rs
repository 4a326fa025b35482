use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use hearth_shared::{AppError, AppResult};

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "schedules";
const TABLE: &str = "scheduled_payments";
/// Paying a schedule resolves its reminder.
const INVALIDATES: &[&str] = &["schedules", "notifications"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPayment {
    pub id: Uuid,
    pub family_id: Uuid,
    pub title: String,
    pub amount: Decimal,
    pub due_on: NaiveDate,
    /// monthly, quarterly, yearly; one-shot when absent.
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NewScheduledPayment {
    pub title: String,
    pub amount: Decimal,
    pub due_on: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ScheduledPaymentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<NaiveDate>,
}

pub struct Schedules<'a> {
    pub(crate) hub: &'a Resources,
}

impl Schedules<'_> {
    /// Unpaid payments, nearest due date first.
    pub async fn list_upcoming(&self) -> AppResult<Vec<ScheduledPayment>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id).with("upcoming");
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<ScheduledPayment> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("paid", false)
            .select("*")
            .order("due_on.asc")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    pub async fn create(&self, payment: NewScheduledPayment) -> AppResult<ScheduledPayment> {
        let scope = self.hub.scope()?;
        let written: ScheduledPayment = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .insert(&FamilyScoped {
                family_id: scope.family_id,
                row: payment,
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn update(&self, id: Uuid, patch: ScheduledPaymentPatch) -> AppResult<ScheduledPayment> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<ScheduledPayment> = self
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
            .ok_or_else(|| AppError::not_found(format!("schedule {id} not found")))?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(updated)
    }

    pub async fn mark_paid(&self, id: Uuid) -> AppResult<ScheduledPayment> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<ScheduledPayment> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .eq("family_id", scope.family_id)
            .update(&json!({ "paid": true }))
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| AppError::not_found(format!("schedule {id} not found")))?;
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
