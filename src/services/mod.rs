pub mod fulfillment;
pub mod polling;
pub mod reconciliation;
