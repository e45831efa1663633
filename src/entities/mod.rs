pub mod product;
pub mod seller;
pub mod stock_reservation;

pub use product::Entity as Product;
pub use seller::Entity as Seller;
pub use stock_reservation::Entity as StockReservation;
