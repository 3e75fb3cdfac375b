//! mapstored: HTTP surface of the map storage service.

pub mod api;
pub mod auth;
pub mod daemon;
pub mod error;
pub mod metrics;
