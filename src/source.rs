//! Vendor-neutral telemetry source abstraction

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One measured value of one point at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Reading {
    pub point: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
}

impl Reading {
    pub fn new(point: &str, ts: DateTime<Utc>, value: f64) -> Self {
        Self {
            point: point.to_string(),
            ts,
            value,
        }
    }
}

/// Static description of a metric a source reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointSpec {
    pub key: &'static str,
    pub unit: &'static str,
    pub label: &'static str,
}

pub mod points {
    use super::PointSpec;

    pub const SOLAR_W: PointSpec = PointSpec {
        key: "solar_w",
        unit: "W",
        label: "Solar power",
    };
    pub const SOLAR_INTERVAL_WH: PointSpec = PointSpec {
        key: "solar_interval_wh",
        unit: "Wh",
        label: "Solar energy per interval",
    };
    pub const SOLAR_ENERGY_TODAY_WH: PointSpec = PointSpec {
        key: "solar_energy_today_wh",
        unit: "Wh",
        label: "Solar energy today",
    };
    pub const BATTERY_SOC: PointSpec = PointSpec {
        key: "battery_soc",
        unit: "%",
        label: "Battery state of charge",
    };
    pub const BATTERY_W: PointSpec = PointSpec {
        key: "battery_w",
        unit: "W",
        label: "Battery power",
    };
    pub const GRID_W: PointSpec = PointSpec {
        key: "grid_w",
        unit: "W",
        label: "Grid power",
    };
    pub const LOAD_W: PointSpec = PointSpec {
        key: "load_w",
        unit: "W",
        label: "Load power",
    };
    pub const SOLAR_INVERTER_W: PointSpec = PointSpec {
        key: "solarinverter_w",
        unit: "W",
        label: "AC-coupled solar power",
    };
    pub const SHUNT_W: PointSpec = PointSpec {
        key: "shunt_w",
        unit: "W",
        label: "DC shunt power",
    };
    pub const BATTERY_IN_WH_TODAY: PointSpec = PointSpec {
        key: "battery_in_wh_today",
        unit: "Wh",
        label: "Battery charged today",
    };
    pub const BATTERY_OUT_WH_TODAY: PointSpec = PointSpec {
        key: "battery_out_wh_today",
        unit: "Wh",
        label: "Battery discharged today",
    };
    pub const GRID_IN_WH_TODAY: PointSpec = PointSpec {
        key: "grid_in_wh_today",
        unit: "Wh",
        label: "Grid import today",
    };
    pub const GRID_OUT_WH_TODAY: PointSpec = PointSpec {
        key: "grid_out_wh_today",
        unit: "Wh",
        label: "Grid export today",
    };
    pub const LOAD_WH_TODAY: PointSpec = PointSpec {
        key: "load_wh_today",
        unit: "Wh",
        label: "Load energy today",
    };
    pub const SOLAR_WH_TODAY: PointSpec = PointSpec {
        key: "solar_wh_today",
        unit: "Wh",
        label: "Solar energy today",
    };
}

/// A vendor API the poller can pull telemetry from
#[async_trait]
pub trait TelemetrySource: Send {
    /// Points this source may emit
    fn points(&self) -> &'static [PointSpec];

    /// Current readings
    async fn fetch_latest(&mut self) -> Result<Vec<Reading>>;

    /// All readings for one local calendar day
    async fn fetch_day(&mut self, day: NaiveDate) -> Result<Vec<Reading>>;

    /// Whether `fetch_day` can reach into the past
    fn supports_history(&self) -> bool;

    /// First day the vendor has data for, when known
    async fn earliest_day(&mut self) -> Result<Option<NaiveDate>>;
}
