//! Service roles for shopstream: write-path catalogs that publish events,
//! consumer roles that maintain aggregates, and the HTTP surface over both.

pub mod auth;
pub mod catalog;
pub mod roles;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telemetry;
