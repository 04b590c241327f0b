use serde::Deserialize;

/// `GET /api/v4/systems/{id}/summary`
#[derive(Debug, Clone, Deserialize)]
pub struct SystemSummary {
    #[serde(default)]
    pub system_id: Option<u64>,
    /// Watts
    #[serde(default)]
    pub current_power: Option<f64>,
    /// Wh produced today
    #[serde(default)]
    pub energy_today: Option<f64>,
    /// Wh produced since commissioning
    #[serde(default)]
    pub energy_lifetime: Option<f64>,
    /// Epoch seconds the system started reporting
    #[serde(default)]
    pub operational_at: Option<i64>,
    #[serde(default)]
    pub last_report_at: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /api/v4/systems/{id}/telemetry/production_micro`
#[derive(Debug, Clone, Deserialize)]
pub struct ProductionMicro {
    #[serde(default)]
    pub system_id: Option<u64>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub total_devices: Option<u32>,
    #[serde(default)]
    pub start_at: Option<i64>,
    #[serde(default)]
    pub end_at: Option<i64>,
    #[serde(default)]
    pub intervals: Vec<MicroInterval>,
}

/// One 15-minute production interval
#[derive(Debug, Clone, Deserialize)]
pub struct MicroInterval {
    pub end_at: i64,
    #[serde(default)]
    pub devices_reporting: Option<u32>,
    /// Average power over the interval in W
    #[serde(default)]
    pub powr: Option<f64>,
    /// Energy produced in the interval in Wh
    #[serde(default)]
    pub enwh: Option<f64>,
}
