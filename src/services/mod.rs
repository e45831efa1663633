// Leaf collaborators
pub mod distance;
pub mod payment_gateway;
pub mod seller_payouts;

// Engine components
pub mod checkout_session;
pub mod delivery_feasibility;
pub mod pricing;
pub mod stock_reservation;

// Orchestration
pub mod checkout;
