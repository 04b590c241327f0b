use serde::Deserialize;

/// `GET /dashboard/hfdata/{device}`
#[derive(Debug, Clone, Deserialize)]
pub struct HfDataResponse {
    pub items: HfItems,
    #[serde(default)]
    pub now: Option<i64>,
}

/// Live values of one SP PRO; power in kW and energy in kWh
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HfItems {
    #[serde(default)]
    pub battery_soc: Option<f64>,
    #[serde(default)]
    pub battery_w: Option<f64>,
    #[serde(default)]
    pub grid_w: Option<f64>,
    #[serde(default)]
    pub load_w: Option<f64>,
    #[serde(default)]
    pub solarinverter_w: Option<f64>,
    #[serde(default)]
    pub shunt_w: Option<f64>,
    #[serde(default)]
    pub battery_in_wh_today: Option<f64>,
    #[serde(default)]
    pub battery_out_wh_today: Option<f64>,
    #[serde(default)]
    pub grid_in_wh_today: Option<f64>,
    #[serde(default)]
    pub grid_out_wh_today: Option<f64>,
    #[serde(default)]
    pub load_wh_today: Option<f64>,
    #[serde(default)]
    pub solar_wh_today: Option<f64>,
    /// Epoch seconds of the sample
    #[serde(default)]
    pub timestamp: Option<i64>,
}
