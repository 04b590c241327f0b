//! Sunrise, sunset and civil twilight times
//!
//! Implements the NOAA sunrise equation. Accuracy is within a couple of
//! minutes for latitudes below the polar circles, which is plenty for
//! deciding when a PV system is worth polling.

use chrono::{DateTime, NaiveDate, Utc};

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
const EARTH_OBLIQUITY_DEG: f64 = 23.4397;

/// Sun altitude at sunrise/sunset, accounting for refraction and disc radius
pub const SUNRISE_ALTITUDE_DEG: f64 = -0.833;
/// Sun altitude at civil dawn/dusk
pub const CIVIL_TWILIGHT_ALTITUDE_DEG: f64 = -6.0;

/// Whether the sun crosses a given altitude on a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarState {
    /// Rises above and sets below the altitude
    Normal,
    /// Stays above the altitude all day
    AlwaysAbove,
    /// Stays below the altitude all day
    AlwaysBelow,
}

/// Solar events of one calendar day at one location, as UTC instants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarDay {
    pub date: NaiveDate,
    pub solar_noon: DateTime<Utc>,
    pub dawn: Option<DateTime<Utc>>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub dusk: Option<DateTime<Utc>>,
    twilight_state: PolarState,
}

impl SolarDay {
    /// Compute solar events for `date` at the given position.
    ///
    /// `date` should be the local calendar date; the transit is anchored to
    /// the observer's longitude so the results land on that local day for
    /// any sensible timezone.
    pub fn compute(date: NaiveDate, latitude: f64, longitude: f64) -> Self {
        let transit = SunTransit::new(date, longitude);

        let (dawn, dusk, twilight_state) = transit.crossing(latitude, CIVIL_TWILIGHT_ALTITUDE_DEG);
        let (sunrise, sunset, _) = transit.crossing(latitude, SUNRISE_ALTITUDE_DEG);

        Self {
            date,
            solar_noon: julian_to_utc(transit.transit_jd),
            dawn,
            sunrise,
            sunset,
            dusk,
            twilight_state,
        }
    }

    /// Polar condition with respect to civil twilight (dawn/dusk)
    pub fn polar_state(&self) -> PolarState {
        self.twilight_state
    }

    /// Length of daylight between sunrise and sunset
    pub fn day_length(&self) -> Option<chrono::Duration> {
        match (self.sunrise, self.sunset) {
            (Some(rise), Some(set)) => Some(set - rise),
            _ => None,
        }
    }
}

struct SunTransit {
    transit_jd: f64,
    declination_rad: f64,
}

impl SunTransit {
    fn new(date: NaiveDate, longitude: f64) -> Self {
        // Whole days since J2000 for the date
        let n = days_since_unix_epoch(date) as f64 - (J2000 - UNIX_EPOCH_JD - 0.5);
        let mean_solar_noon = n - longitude / 360.0;

        let mean_anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
        let m = mean_anomaly.to_radians();
        let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
        let ecliptic_longitude = (mean_anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
        let lambda = ecliptic_longitude.to_radians();

        let transit_jd =
            J2000 + mean_solar_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * lambda).sin();
        let declination_rad = (lambda.sin() * EARTH_OBLIQUITY_DEG.to_radians().sin()).asin();

        Self {
            transit_jd,
            declination_rad,
        }
    }

    /// Rise and set instants for the sun crossing `altitude_deg`
    fn crossing(
        &self,
        latitude: f64,
        altitude_deg: f64,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>, PolarState) {
        let phi = latitude.to_radians();
        let delta = self.declination_rad;
        let cos_hour_angle =
            (altitude_deg.to_radians().sin() - phi.sin() * delta.sin()) / (phi.cos() * delta.cos());

        if cos_hour_angle.is_nan() || cos_hour_angle > 1.0 {
            return (None, None, PolarState::AlwaysBelow);
        }
        if cos_hour_angle < -1.0 {
            return (None, None, PolarState::AlwaysAbove);
        }

        let hour_angle_days = cos_hour_angle.acos().to_degrees() / 360.0;
        (
            Some(julian_to_utc(self.transit_jd - hour_angle_days)),
            Some(julian_to_utc(self.transit_jd + hour_angle_days)),
            PolarState::Normal,
        )
    }
}

fn days_since_unix_epoch(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (date - epoch).num_days()
}

fn julian_to_utc(jd: f64) -> DateTime<Utc> {
    let secs = (jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY;
    DateTime::<Utc>::from_timestamp(secs.round() as i64, 0).unwrap_or_default()
}
