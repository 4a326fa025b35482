use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use hearth_shared::AppResult;

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "monthly";
const TABLE: &str = "monthly_entries";
const INVALIDATES: &[&str] = &["monthly"];

/// Planned-vs-actual tracker line for one category in one month
/// (`month` is `YYYY-MM`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyEntry {
    pub id: Uuid,
    pub family_id: Uuid,
    pub month: String,
    pub category: String,
    pub planned: Decimal,
    pub actual: Decimal,
}

#[derive(Debug, Serialize)]
struct NewMonthlyEntry<'a> {
    month: &'a str,
    category: &'a str,
    planned: Decimal,
    actual: Decimal,
}

pub struct Monthly<'a> {
    pub(crate) hub: &'a Resources,
}

impl Monthly<'_> {
    pub async fn list_for_month(&self, month: &str) -> AppResult<Vec<MonthlyEntry>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id).with(month);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<MonthlyEntry> = self
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

    pub async fn upsert(
        &self,
        month: &str,
        category: &str,
        planned: Decimal,
        actual: Decimal,
    ) -> AppResult<MonthlyEntry> {
        let scope = self.hub.scope()?;
        let existing: Option<MonthlyEntry> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("month", month)
            .eq("category", category)
            .fetch_optional()
            .await?;

        let written: MonthlyEntry = match existing {
            Some(entry) => {
                let mut rows: Vec<MonthlyEntry> = self
                    .hub
                    .rest()
                    .table(TABLE)
                    .bearer(&scope.token)
                    .eq("id", entry.id)
                    .update(&json!({ "planned": planned, "actual": actual }))
                    .await?;
                rows.pop().unwrap_or(entry)
            }
            None => {
                self.hub
                    .rest()
                    .table(TABLE)
                    .bearer(&scope.token)
                    .insert(&FamilyScoped {
                        family_id: scope.family_id,
                        row: NewMonthlyEntry {
                            month,
                            category,
                            planned,
                            actual,
                        },
                    })
                    .await?
            }
        };

        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }
}
