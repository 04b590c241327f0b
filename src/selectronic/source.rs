use crate::error::{HelionError, Result};
use crate::selectronic::client::SelectLiveClient;
use crate::selectronic::types::HfItems;
use crate::source::{PointSpec, Reading, TelemetrySource, points};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// hfdata reports power in kW and energy in kWh
const KILO: f64 = 1000.0;

static SELECTRONIC_POINTS: [PointSpec; 12] = [
    points::BATTERY_SOC,
    points::BATTERY_W,
    points::GRID_W,
    points::LOAD_W,
    points::SOLAR_INVERTER_W,
    points::SHUNT_W,
    points::BATTERY_IN_WH_TODAY,
    points::BATTERY_OUT_WH_TODAY,
    points::GRID_IN_WH_TODAY,
    points::GRID_OUT_WH_TODAY,
    points::LOAD_WH_TODAY,
    points::SOLAR_WH_TODAY,
];

/// Live-only telemetry source for one Select.Live device
pub struct SelectLiveSource {
    client: SelectLiveClient,
    device_id: String,
}

impl SelectLiveSource {
    pub fn new(client: SelectLiveClient, device_id: &str) -> Self {
        Self {
            client,
            device_id: device_id.to_string(),
        }
    }
}

/// Map one hfdata sample to readings in W, Wh and %
pub fn readings_from_items(items: &HfItems, fallback_ts: DateTime<Utc>) -> Vec<Reading> {
    let ts = items
        .timestamp
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .unwrap_or(fallback_ts);

    let scaled = [
        (points::BATTERY_W, items.battery_w),
        (points::GRID_W, items.grid_w),
        (points::LOAD_W, items.load_w),
        (points::SOLAR_INVERTER_W, items.solarinverter_w),
        (points::SHUNT_W, items.shunt_w),
        (points::BATTERY_IN_WH_TODAY, items.battery_in_wh_today),
        (points::BATTERY_OUT_WH_TODAY, items.battery_out_wh_today),
        (points::GRID_IN_WH_TODAY, items.grid_in_wh_today),
        (points::GRID_OUT_WH_TODAY, items.grid_out_wh_today),
        (points::LOAD_WH_TODAY, items.load_wh_today),
        (points::SOLAR_WH_TODAY, items.solar_wh_today),
    ];

    let mut readings: Vec<Reading> = items
        .battery_soc
        .map(|soc| Reading::new(points::BATTERY_SOC.key, ts, soc))
        .into_iter()
        .collect();
    readings.extend(
        scaled
            .into_iter()
            .filter_map(|(spec, v)| v.map(|v| Reading::new(spec.key, ts, v * KILO))),
    );
    readings
}

#[async_trait]
impl TelemetrySource for SelectLiveSource {
    fn points(&self) -> &'static [PointSpec] {
        &SELECTRONIC_POINTS
    }

    async fn fetch_latest(&mut self) -> Result<Vec<Reading>> {
        let data = self.client.hfdata(&self.device_id).await?;
        Ok(readings_from_items(&data.items, Utc::now()))
    }

    async fn fetch_day(&mut self, day: NaiveDate) -> Result<Vec<Reading>> {
        Err(HelionError::api(format!(
            "Select.Live has no history endpoint (requested {})",
            day
        )))
    }

    fn supports_history(&self) -> bool {
        false
    }

    async fn earliest_day(&mut self) -> Result<Option<NaiveDate>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn items_are_scaled_to_watts() {
        let items = HfItems {
            battery_soc: Some(87.5),
            battery_w: Some(-1.25),
            load_w: Some(0.6),
            timestamp: Some(1_717_200_000),
            ..HfItems::default()
        };
        let fallback = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let readings = readings_from_items(&items, fallback);

        assert_eq!(readings.len(), 3);
        let soc = readings.iter().find(|r| r.point == "battery_soc").unwrap();
        assert_eq!(soc.value, 87.5);
        assert_eq!(soc.ts.timestamp(), 1_717_200_000);
        let battery = readings.iter().find(|r| r.point == "battery_w").unwrap();
        assert_eq!(battery.value, -1250.0);
    }

    #[test]
    fn missing_timestamp_uses_fallback() {
        let fallback = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let items = HfItems {
            grid_w: Some(0.1),
            ..HfItems::default()
        };
        let readings = readings_from_items(&items, fallback);
        assert_eq!(readings[0].ts, fallback);
    }
}
