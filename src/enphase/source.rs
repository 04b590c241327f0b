use crate::credentials::OAuthToken;
use crate::enphase::client::EnphaseClient;
use crate::enphase::types::{ProductionMicro, SystemSummary};
use crate::error::{HelionError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::schedule::local_to_utc;
use crate::source::{PointSpec, Reading, TelemetrySource, points};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

static ENPHASE_POINTS: [PointSpec; 3] = [
    points::SOLAR_W,
    points::SOLAR_INTERVAL_WH,
    points::SOLAR_ENERGY_TODAY_WH,
];

/// Telemetry source for one Enphase system
///
/// Owns the OAuth token for the system. Tokens are loaded from the store,
/// refreshed ahead of expiry and written back after every refresh.
pub struct EnphaseSource {
    client: EnphaseClient,
    store: Arc<Store>,
    system_id: String,
    site_id: String,
    tz: Tz,
    refresh_margin: Duration,
    seed_refresh_token: Option<String>,
    token: Option<OAuthToken>,
    earliest: Option<NaiveDate>,
    logger: StructuredLogger,
}

impl EnphaseSource {
    pub fn new(
        client: EnphaseClient,
        store: Arc<Store>,
        system_id: &str,
        site_id: &str,
        tz: Tz,
        refresh_margin: Duration,
        seed_refresh_token: Option<String>,
    ) -> Self {
        Self {
            client,
            store,
            system_id: system_id.to_string(),
            site_id: site_id.to_string(),
            tz,
            refresh_margin,
            seed_refresh_token: seed_refresh_token.filter(|t| !t.trim().is_empty()),
            token: None,
            earliest: None,
            logger: get_logger("enphase").for_system(system_id),
        }
    }

    fn current_token(&mut self) -> Result<OAuthToken> {
        if let Some(t) = &self.token {
            return Ok(t.clone());
        }
        let loaded = match self.store.load_credentials(&self.system_id)? {
            Some(t) => t,
            None => match &self.seed_refresh_token {
                Some(seed) => {
                    self.logger
                        .info("Using configured refresh token until the store holds credentials");
                    OAuthToken::from_refresh_token(seed.clone())
                }
                None => {
                    return Err(HelionError::auth(format!(
                        "No Enphase credentials for system '{}'; authorize it first",
                        self.system_id
                    )));
                }
            },
        };
        self.token = Some(loaded.clone());
        Ok(loaded)
    }

    /// Access token valid for at least the refresh margin
    async fn access_token(&mut self, force_refresh: bool) -> Result<String> {
        let token = self.current_token()?;
        let now = Utc::now();
        if !force_refresh && !token.needs_refresh(now, self.refresh_margin) {
            return Ok(token.access_token);
        }
        if !token.has_refresh_token() {
            return Err(HelionError::auth("Enphase refresh token missing"));
        }

        self.logger.info("Refreshing Enphase access token");
        let grant = match self.client.refresh_token(&token.refresh_token).await {
            Ok(g) => g,
            Err(e) => {
                if e.is_auth() {
                    self.logger
                        .error("Enphase refresh token rejected; re-authorization required");
                    // Pick up credentials stored by a later authorization
                    self.token = None;
                }
                return Err(e);
            }
        };
        let refreshed = OAuthToken::from_grant(grant, Utc::now(), Some(&token.refresh_token));
        self.store.save_credentials(&self.system_id, &refreshed)?;
        self.logger.debug(&format!(
            "Access token valid until {}",
            refreshed.expires_at.to_rfc3339()
        ));
        let access = refreshed.access_token.clone();
        self.token = Some(refreshed);
        Ok(access)
    }

    async fn summary(&mut self) -> Result<SystemSummary> {
        let token = self.access_token(false).await?;
        match self.client.summary(&self.site_id, &token).await {
            Err(e) if e.is_auth() => {
                self.logger.warn("Summary returned 401; refreshing token and retrying");
                let token = self.access_token(true).await?;
                self.client.summary(&self.site_id, &token).await
            }
            other => other,
        }
    }

    async fn production_micro(&mut self, start_at: i64) -> Result<ProductionMicro> {
        let token = self.access_token(false).await?;
        match self
            .client
            .production_micro(&self.site_id, &token, start_at)
            .await
        {
            Err(e) if e.is_auth() => {
                self.logger
                    .warn("Production request returned 401; refreshing token and retrying");
                let token = self.access_token(true).await?;
                self.client
                    .production_micro(&self.site_id, &token, start_at)
                    .await
            }
            other => other,
        }
    }

    fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = local_to_utc(&self.tz, day.and_time(NaiveTime::MIN));
        let end = day
            .succ_opt()
            .map_or(start + Duration::days(1), |next| {
                local_to_utc(&self.tz, next.and_time(NaiveTime::MIN))
            });
        (start, end)
    }
}

/// Convert one day of micro-inverter intervals into readings
///
/// Each interval yields its energy and average power at its end instant. The
/// running total of the day lands on the last interval.
pub fn readings_from_intervals(
    micro: &ProductionMicro,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> Vec<Reading> {
    let mut readings = Vec::new();
    let mut total_wh = 0.0;
    let mut last_end: Option<DateTime<Utc>> = None;

    for interval in &micro.intervals {
        let Some(end) = DateTime::<Utc>::from_timestamp(interval.end_at, 0) else {
            continue;
        };
        if end <= day_start || end > day_end {
            continue;
        }
        if let Some(wh) = interval.enwh {
            total_wh += wh;
            readings.push(Reading::new(points::SOLAR_INTERVAL_WH.key, end, wh));
        }
        if let Some(w) = interval.powr {
            readings.push(Reading::new(points::SOLAR_W.key, end, w));
        }
        if last_end.is_none_or(|l| end > l) {
            last_end = Some(end);
        }
    }

    if let Some(end) = last_end {
        readings.push(Reading::new(
            points::SOLAR_ENERGY_TODAY_WH.key,
            end,
            total_wh,
        ));
    }
    readings
}

#[async_trait]
impl TelemetrySource for EnphaseSource {
    fn points(&self) -> &'static [PointSpec] {
        &ENPHASE_POINTS
    }

    async fn fetch_latest(&mut self) -> Result<Vec<Reading>> {
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        self.fetch_day(today).await
    }

    async fn fetch_day(&mut self, day: NaiveDate) -> Result<Vec<Reading>> {
        let (start, end) = self.day_bounds(day);
        let micro = self.production_micro(start.timestamp()).await?;
        let readings = readings_from_intervals(&micro, start, end);
        self.logger.debug(&format!(
            "Fetched {} readings for {} ({} intervals)",
            readings.len(),
            day,
            micro.intervals.len()
        ));
        Ok(readings)
    }

    fn supports_history(&self) -> bool {
        true
    }

    async fn earliest_day(&mut self) -> Result<Option<NaiveDate>> {
        if let Some(day) = self.earliest {
            return Ok(Some(day));
        }
        if let Some(day) = self
            .store
            .get_system(&self.system_id)?
            .and_then(|s| s.earliest_day)
        {
            self.earliest = Some(day);
            return Ok(Some(day));
        }

        let summary = self.summary().await?;
        let day = summary
            .operational_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|t| t.with_timezone(&self.tz).date_naive());
        if let Some(day) = day {
            self.store.set_earliest_day(&self.system_id, day)?;
            self.earliest = Some(day);
        }
        Ok(day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enphase::types::MicroInterval;
    use chrono::TimeZone;

    fn interval(end_at: i64, powr: f64, enwh: f64) -> MicroInterval {
        MicroInterval {
            end_at,
            devices_reporting: Some(10),
            powr: Some(powr),
            enwh: Some(enwh),
        }
    }

    #[test]
    fn intervals_outside_the_day_are_dropped() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(1);
        let s = start.timestamp();
        let micro = ProductionMicro {
            system_id: Some(42),
            granularity: Some("day".into()),
            total_devices: Some(10),
            start_at: Some(s),
            end_at: Some(end.timestamp()),
            intervals: vec![
                interval(s, 1.0, 1.0),
                interval(s + 900, 400.0, 100.0),
                interval(s + 1800, 800.0, 200.0),
                interval(end.timestamp() + 900, 5.0, 5.0),
            ],
        };

        let readings = readings_from_intervals(&micro, start, end);
        let energy: Vec<_> = readings
            .iter()
            .filter(|r| r.point == "solar_interval_wh")
            .collect();
        assert_eq!(energy.len(), 2);

        let total = readings
            .iter()
            .find(|r| r.point == "solar_energy_today_wh")
            .unwrap();
        assert_eq!(total.value, 300.0);
        assert_eq!(total.ts.timestamp(), s + 1800);
    }

    #[test]
    fn empty_day_has_no_total() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let micro = ProductionMicro {
            system_id: None,
            granularity: None,
            total_devices: None,
            start_at: None,
            end_at: None,
            intervals: vec![],
        };
        assert!(readings_from_intervals(&micro, start, start + Duration::days(1)).is_empty());
    }
}
