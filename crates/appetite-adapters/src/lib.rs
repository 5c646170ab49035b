//! Collaborator adapters for the risk appetite engine.

#![deny(unsafe_code)]

pub mod failing;
pub mod fixtures;
pub mod postgres;

pub use failing::AlwaysFailCollaborator;
pub use fixtures::{FixtureSet, TenantFixture};
pub use postgres::PgCollaborators;
