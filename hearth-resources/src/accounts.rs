use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_shared::{AppError, AppResult};

use crate::store::QueryKey;
use crate::{FamilyScoped, Resources};

const RESOURCE: &str = "accounts";
const TABLE: &str = "bank_accounts";
/// Account balances feed the month tracker.
const INVALIDATES: &[&str] = &["accounts", "monthly"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: Uuid,
    pub family_id: Uuid,
    pub name: String,
    pub institution: Option<String>,
    pub account_type: String,
    pub balance: Decimal,
    pub currency: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct NewBankAccount {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    pub account_type: String,
    pub balance: Decimal,
    pub currency: String,
}

#[derive(Debug, Default, Serialize)]
pub struct BankAccountPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
}

pub struct Accounts<'a> {
    pub(crate) hub: &'a Resources,
}

impl Accounts<'_> {
    pub async fn list(&self) -> AppResult<Vec<BankAccount>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }

        let rows: Vec<BankAccount> = self
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

    pub async fn create(&self, account: NewBankAccount) -> AppResult<BankAccount> {
        let scope = self.hub.scope()?;
        let written: BankAccount = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .insert(&FamilyScoped {
                family_id: scope.family_id,
                row: account,
            })
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        Ok(written)
    }

    pub async fn update(&self, id: Uuid, patch: BankAccountPatch) -> AppResult<BankAccount> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<BankAccount> = self
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
            .ok_or_else(|| AppError::not_found(format!("account {id} not found")))?;
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
