// Request-scoped checkout models
pub mod cart;
pub mod order_details;

pub use cart::{
    unique_seller_ids, validate_cart, CartLine, DeliveryMode, COMPACT_FIELD_SEPARATOR,
    COMPACT_LINE_SEPARATOR, MAX_UNIT_PRICE_CENTS,
};
pub use order_details::OrderDetails;
