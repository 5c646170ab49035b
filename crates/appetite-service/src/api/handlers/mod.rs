//! API request handlers

pub mod board_scenarios;
pub mod health;
pub mod risk_appetite;
pub mod snapshots;

pub use health::{health_check, service_status};
