use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use hearth_shared::AppResult;

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "budgets";
const TABLE: &str = "budgets";
const INVALIDATES: &[&str] = &["budgets"];

/// Category budget for one month (`month` is `YYYY-MM`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub family_id: Uuid,
    pub category: String,
    pub month: String,
    pub amount: Decimal,
    #[serde(default)]
    pub spent: Decimal,
}

#[derive(Debug, Serialize)]
struct NewBudget<'a> {
    category: &'a str,
    month: &'a str,
    amount: Decimal,
}

pub struct Budgets<'a> {
    pub(crate) hub: &'a Resources,
}

impl Budgets<'_> {
    pub async fn list_for_month(&self, month: &str) -> AppResult<Vec<Budget>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id).with(month);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<Budget> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("month", month)
            .select("*")
            .order("category.asc")
            .fetch()
            .await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    /// Create the category budget for the month, or adjust its amount
    /// when one already exists.
    pub async fn upsert(&self, category: &str, month: &str, amount: Decimal) -> AppResult<Budget> {
        let scope = self.hub.scope()?;
        let existing: Option<Budget> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("category", category)
            .eq("month", month)
            .fetch_optional()
            .await?;

        let written: Budget = match existing {
            Some(budget) => {
                let mut rows: Vec<Budget> = self
                    .hub
                    .rest()
                    .table(TABLE)
                    .bearer(&scope.token)
                    .eq("id", budget.id)
                    .update(&json!({ "amount": amount }))
                    .await?;
                rows.pop().unwrap_or(budget)
            }
            None => {
                self.hub
                    .rest()
                    .table(TABLE)
                    .bearer(&scope.token)
                    .insert(&FamilyScoped {
                        family_id: scope.family_id,
                        row: NewBudget {
                            category,
                            month,
                            amount,
                        },
                    })
                    .await?
            }
        };

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
