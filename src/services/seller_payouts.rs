use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::entities::seller;
use crate::errors::CheckoutError;

/// Answers whether sellers can receive payouts through the gateway.
#[async_trait]
pub trait PayoutDirectory: Send + Sync {
    /// Payout eligibility per seller id. Unknown sellers may be left out of the map.
    async fn payout_status(
        &self,
        seller_ids: &[String],
    ) -> Result<HashMap<String, bool>, CheckoutError>;
}

/// Reads payout eligibility from the `sellers` table.
#[derive(Clone)]
pub struct DbPayoutDirectory {
    db_pool: Arc<DatabaseConnection>,
}

impl DbPayoutDirectory {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PayoutDirectory for DbPayoutDirectory {
    #[instrument(skip(self))]
    async fn payout_status(
        &self,
        seller_ids: &[String],
    ) -> Result<HashMap<String, bool>, CheckoutError> {
        let sellers = seller::Entity::find()
            .filter(seller::Column::Id.is_in(seller_ids.to_vec()))
            .all(&*self.db_pool)
            .await?;

        Ok(sellers
            .into_iter()
            .map(|s| {
                let payable = s.is_payable();
                (s.id, payable)
            })
            .collect())
    }
}
