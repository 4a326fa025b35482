use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use hearth_shared::{AppError, AppResult};

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "loans";
const TABLE: &str = "loans";
/// EMI payments move upcoming-payment projections.
const INVALIDATES: &[&str] = &["loans", "schedules"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    pub family_id: Uuid,
    pub name: String,
    pub lender: Option<String>,
    pub principal: Decimal,
    pub outstanding: Decimal,
    pub emi_amount: Decimal,
    pub interest_rate: Decimal,
    #[serde(default)]
    pub last_paid_on: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct NewLoan {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lender: Option<String>,
    pub principal: Decimal,
    pub outstanding: Decimal,
    pub emi_amount: Decimal,
    pub interest_rate: Decimal,
}

#[derive(Debug, Default, Serialize)]
pub struct LoanPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emi_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_rate: Option<Decimal>,
}

pub struct Loans<'a> {
    pub(crate) hub: &'a Resources,
}

impl Loans<'_> {
    pub async fn list(&self) -> AppResult<Vec<Loan>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<Loan> = self
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

    pub async fn create(&self, loan: NewLoan) -> AppResult<Loan> {
        let scope = self.hub.scope()?;
        let written: Loan = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .insert(&FamilyScoped {
                family_id: scope.family_id,
                row: loan,
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn update(&self, id: Uuid, patch: LoanPatch) -> AppResult<Loan> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<Loan> = self
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
            .ok_or_else(|| AppError::not_found(format!("loan {id} not found")))?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(updated)
    }

    /// Record an EMI payment: reduces the outstanding amount and stamps
    /// the payment date.
    pub async fn record_payment(
        &self,
        id: Uuid,
        amount: Decimal,
        paid_on: NaiveDate,
    ) -> AppResult<Loan> {
        let scope = self.hub.scope()?;
        let loan: Loan = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .eq("family_id", scope.family_id)
            .fetch_optional()
            .await?
            .ok_or_else(|| AppError::not_found(format!("loan {id} not found")))?;

        let outstanding = (loan.outstanding - amount).max(Decimal::ZERO);
        let mut rows: Vec<Loan> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .update(&json!({ "outstanding": outstanding, "last_paid_on": paid_on }))
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| AppError::not_found(format!("loan {id} not found")))?;
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
