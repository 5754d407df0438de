pub mod api;
pub mod gateway;
pub mod reconciliation;
pub mod refund;
pub mod service;
pub mod settlement;
pub mod wallet;
