//! Risk appetite service library
//!
//! This crate provides the components of the `appetited` daemon:
//! - REST API with tenant-scoped routes
//! - Layered configuration
//! - Background detection scheduler
//! - Server lifecycle management

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;

pub use api::{create_router, AppState};
pub use config::ServiceConfig;
pub use error::{ApiError, ServiceError};
pub use scheduler::DetectionScheduler;
pub use server::Server;
