//! Enphase Enlighten v4 integration
//!
//! OAuth2 protected REST API. Data calls carry both the application API key
//! (`key` query parameter) and a per-system bearer token.

pub mod client;
pub mod source;
pub mod types;

pub use client::EnphaseClient;
pub use source::{EnphaseSource, readings_from_intervals};
pub use types::{MicroInterval, ProductionMicro, SystemSummary};
