use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::services::distance::Coordinates;

/// Product as seen by the checkout engine.
///
/// The catalogue owns this table; checkout only reads it. `stock == None`
/// means the product is not stock-tracked.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub title: String,

    pub seller_id: String,

    /// Authoritative stock ceiling, `None` for unlimited
    pub stock: Option<i32>,

    pub max_stock: Option<i32>,

    /// Pickup location of the seller
    pub seller_latitude: Option<f64>,
    pub seller_longitude: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn seller_coordinates(&self) -> Option<Coordinates> {
        match (self.seller_latitude, self.seller_longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    pub fn is_stock_tracked(&self) -> bool {
        self.stock.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_reservation::Entity")]
    StockReservations,
}

impl Related<super::stock_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockReservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
