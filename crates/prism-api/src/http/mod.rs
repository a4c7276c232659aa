//! HTTP routes and middleware.

pub(crate) mod caching;
pub(crate) mod constants;
pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod image;
pub(crate) mod params;
pub mod router;
pub(crate) mod telemetry;
