pub mod api;
pub mod coordinator;
pub mod inventory;
pub mod lifecycle;
pub mod outbox;
pub mod promo;
pub mod sweeper;
