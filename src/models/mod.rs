pub mod order;

pub use order::{
    AgentStatus, AttemptStatus, CustomerInfo, DeliveryLeg, DeliveryView, Order, OrderProjection,
    PaymentAttempt, PaymentMethod, PaymentPath, PickupLeg, StatusHistoryEntry,
};
