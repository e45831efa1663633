use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Seller payout profile. Maintained by onboarding, read by checkout.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sellers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    /// Connected account at the payment gateway
    pub payout_account_id: Option<String>,
    pub payouts_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// A seller can receive funds once the gateway account exists and payouts are switched on.
    pub fn is_payable(&self) -> bool {
        self.payouts_enabled
            && self
                .payout_account_id
                .as_deref()
                .is_some_and(|account| !account.trim().is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
