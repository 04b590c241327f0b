//! # Helion - solar and battery telemetry poller
//!
//! Polls Enphase and Selectronic Select.Live systems on a schedule that
//! follows the sun, keeps every reading in SQLite and serves it to a
//! dashboard over HTTP.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration, defaults and validation
//! - `logging`: Structured logging and tracing
//! - `solar`: Sunrise, sunset and twilight for a location and date
//! - `schedule`: When each system is due for a poll
//! - `source`: Vendor-neutral telemetry source trait and point catalogue
//! - `enphase`: Enphase Enlighten v4 client and source
//! - `selectronic`: Select.Live client and source
//! - `credentials`: OAuth token lifecycle
//! - `store`: SQLite persistence for systems, readings, tokens and poll runs
//! - `backfill`: Walking history one day at a time
//! - `poller`: The polling loop
//! - `web`: HTTP server and REST API

pub mod backfill;
pub mod config;
pub mod credentials;
pub mod enphase;
pub mod error;
pub mod logging;
pub mod poller;
pub mod schedule;
pub mod selectronic;
pub mod solar;
pub mod source;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::{HelionError, Result};
pub use poller::Poller;
pub use store::Store;
