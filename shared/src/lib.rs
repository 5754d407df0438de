pub mod db;
pub mod error;
pub mod events;
pub mod pricing;
pub mod promo;
pub mod state_machine;
pub mod status;

pub use error::{AppError, AppResult, ErrorResponse};
pub use status::*;
