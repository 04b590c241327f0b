//! Selectronic Select.Live integration
//!
//! Cookie-session portal scraping for SP PRO inverters. Live values only.

pub mod client;
pub mod source;
pub mod types;

pub use client::SelectLiveClient;
pub use source::{SelectLiveSource, readings_from_items};
pub use types::{HfDataResponse, HfItems};
