//! Polling schedule predicate
//!
//! Enphase systems only change while the sun is up, and the vendor meters
//! API calls, so they follow a dawn/dusk-aware plan: every 30 minutes from
//! civil dawn + 30 min until civil dusk + 30 min, plus hourly polls between
//! 01:00 and 05:00 local time that re-fetch the previous day to pick up late
//! corrections. Battery systems (Select.Live) change around the clock and
//! are polled on a fixed interval.

use crate::config::{Config, ScheduleConfig, SystemConfig, Vendor};
use crate::error::Result;
use crate::solar::{PolarState, SolarDay};
use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// How far ahead `next_poll_at` looks
const LOOKAHEAD_HOURS: i64 = 48;

/// Which part of the plan an instant falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Inside the dawn/dusk window
    Active,
    /// Inside the early-morning previous-day correction hours
    Correction,
    /// Nothing to do
    Idle,
    /// Fixed-interval policy
    Fixed,
}

/// Outcome of evaluating a schedule at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollDecision {
    pub due: bool,
    pub kind: SlotKind,
    /// Start of the slot `now` falls into; a poll at or after it satisfies the slot
    pub slot_start: Option<DateTime<Utc>>,
    /// The poll should also re-fetch the previous local day
    pub include_previous_day: bool,
}

/// Dawn/dusk bounded active window for one local date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ActiveWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Solar-aware schedule for one location
#[derive(Debug, Clone)]
pub struct SolarSchedule {
    pub latitude: f64,
    pub longitude: f64,
    pub tz: Tz,
    pub dawn_offset: Duration,
    pub dusk_offset: Duration,
    pub interval_minutes: u32,
    pub correction_start_hour: u32,
    pub correction_end_hour: u32,
}

/// Polling policy of a system
#[derive(Debug, Clone)]
pub enum SchedulePolicy {
    Solar(SolarSchedule),
    Fixed { interval: Duration },
}

/// Serializable view of a system's schedule for the API
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub policy: &'static str,
    pub timezone: Option<String>,
    pub window: Option<ActiveWindow>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub decision: PollDecision,
    pub next_poll_at: Option<DateTime<Utc>>,
}

impl SolarSchedule {
    pub fn new(latitude: f64, longitude: f64, tz: Tz, cfg: &ScheduleConfig) -> Self {
        Self {
            latitude,
            longitude,
            tz,
            dawn_offset: Duration::minutes(cfg.dawn_offset_minutes),
            dusk_offset: Duration::minutes(cfg.dusk_offset_minutes),
            interval_minutes: cfg.active_interval_minutes.max(1),
            correction_start_hour: cfg.correction_start_hour,
            correction_end_hour: cfg.correction_end_hour,
        }
    }

    /// Active window for a local date; `None` during polar night
    pub fn window_for(&self, date: NaiveDate) -> Option<ActiveWindow> {
        let day = SolarDay::compute(date, self.latitude, self.longitude);
        match (day.dawn, day.dusk) {
            (Some(dawn), Some(dusk)) => Some(ActiveWindow {
                date,
                start: dawn + self.dawn_offset,
                end: dusk + self.dusk_offset,
            }),
            _ if day.polar_state() == PolarState::AlwaysAbove => Some(ActiveWindow {
                date,
                start: local_to_utc(&self.tz, date.and_time(chrono::NaiveTime::MIN)),
                end: local_to_utc(
                    &self.tz,
                    date.succ_opt().unwrap_or(date).and_time(chrono::NaiveTime::MIN),
                ),
            }),
            _ => None,
        }
    }

    pub fn evaluate(&self, now: DateTime<Utc>, last_poll: Option<DateTime<Utc>>) -> PollDecision {
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();

        // Yesterday's window may run past local midnight at high latitudes
        let in_active = [today.pred_opt(), Some(today)]
            .into_iter()
            .flatten()
            .filter_map(|d| self.window_for(d))
            .any(|w| w.contains(now));

        let hour = local.hour();
        let in_correction = hour >= self.correction_start_hour && hour < self.correction_end_hour;
        let hour_start = self.floor_local(now, 60);
        let polled_since = |start: DateTime<Utc>| last_poll.is_some_and(|l| l >= start);

        if in_active {
            let slot_start = self.floor_local(now, self.interval_minutes);
            return PollDecision {
                due: !polled_since(slot_start),
                kind: SlotKind::Active,
                slot_start: Some(slot_start),
                include_previous_day: in_correction && !polled_since(hour_start),
            };
        }

        if in_correction {
            return PollDecision {
                due: !polled_since(hour_start),
                kind: SlotKind::Correction,
                slot_start: Some(hour_start),
                include_previous_day: true,
            };
        }

        PollDecision {
            due: false,
            kind: SlotKind::Idle,
            slot_start: None,
            include_previous_day: false,
        }
    }

    pub fn next_poll_at(
        &self,
        now: DateTime<Utc>,
        last_poll: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if self.evaluate(now, last_poll).due {
            return Some(now);
        }

        let step = gcd(self.interval_minutes, 60).max(1);
        let mut candidates: Vec<DateTime<Utc>> = Vec::new();

        // Slot boundaries on the local clock
        let first = self.floor_local_naive(now, step);
        let steps = LOOKAHEAD_HOURS * 60 / i64::from(step);
        for i in 1..=steps {
            candidates.push(local_to_utc(
                &self.tz,
                first + Duration::minutes(i * i64::from(step)),
            ));
        }

        // Window openings rarely sit on a boundary
        let today = now.with_timezone(&self.tz).date_naive();
        let mut day = today;
        for _ in 0..3 {
            if let Some(w) = self.window_for(day) {
                candidates.push(w.start);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        let horizon = now + Duration::hours(LOOKAHEAD_HOURS);
        candidates.retain(|c| *c > now && *c <= horizon);
        candidates.sort();
        candidates.dedup();
        candidates
            .into_iter()
            .find(|c| self.evaluate(*c, last_poll).due)
    }

    fn floor_local_naive(&self, at: DateTime<Utc>, step_minutes: u32) -> NaiveDateTime {
        let local = at.with_timezone(&self.tz).naive_local();
        let minutes = local.hour() * 60 + local.minute();
        let floored = minutes - minutes % step_minutes.max(1);
        local
            .date()
            .and_hms_opt(floored / 60, floored % 60, 0)
            .unwrap_or(local)
    }

    /// Slot start on the local clock, kept in the offset `at` is in so a
    /// repeated hour after a DST fall-back gets its own slot
    fn floor_local(&self, at: DateTime<Utc>, step_minutes: u32) -> DateTime<Utc> {
        let offset = at.with_timezone(&self.tz).offset().fix().local_minus_utc();
        let naive =
            self.floor_local_naive(at, step_minutes) - Duration::seconds(i64::from(offset));
        Utc.from_utc_datetime(&naive).min(at)
    }
}

impl SchedulePolicy {
    /// Build the policy a configured system should follow
    pub fn for_system(config: &Config, system: &SystemConfig) -> Result<Self> {
        match system.vendor {
            Vendor::Enphase => {
                let tz = config.system_timezone(system)?;
                Ok(Self::Solar(SolarSchedule::new(
                    system.latitude,
                    system.longitude,
                    tz,
                    &config.schedule,
                )))
            }
            Vendor::Selectronic => Ok(Self::Fixed {
                interval: Duration::seconds(
                    i64::try_from(config.selectronic.poll_interval_seconds)
                        .unwrap_or(i64::MAX)
                        .min(86_400),
                ),
            }),
        }
    }

    pub fn evaluate(&self, now: DateTime<Utc>, last_poll: Option<DateTime<Utc>>) -> PollDecision {
        match self {
            Self::Solar(s) => s.evaluate(now, last_poll),
            Self::Fixed { interval } => PollDecision {
                due: last_poll.is_none_or(|l| now - l >= *interval),
                kind: SlotKind::Fixed,
                slot_start: None,
                include_previous_day: false,
            },
        }
    }

    pub fn next_poll_at(
        &self,
        now: DateTime<Utc>,
        last_poll: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Solar(s) => s.next_poll_at(now, last_poll),
            Self::Fixed { interval } => {
                Some(last_poll.map_or(now, |l| (l + *interval).max(now)))
            }
        }
    }

    /// Active window for a local date (solar policy only)
    pub fn window_for(&self, date: NaiveDate) -> Option<ActiveWindow> {
        match self {
            Self::Solar(s) => s.window_for(date),
            Self::Fixed { .. } => None,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>, last_poll: Option<DateTime<Utc>>) -> ScheduleSnapshot {
        let decision = self.evaluate(now, last_poll);
        let next_poll_at = self.next_poll_at(now, last_poll);
        match self {
            Self::Solar(s) => {
                let today = now.with_timezone(&s.tz).date_naive();
                let day = SolarDay::compute(today, s.latitude, s.longitude);
                ScheduleSnapshot {
                    policy: "solar",
                    timezone: Some(s.tz.name().to_string()),
                    window: s.window_for(today),
                    sunrise: day.sunrise,
                    sunset: day.sunset,
                    decision,
                    next_poll_at,
                }
            }
            Self::Fixed { .. } => ScheduleSnapshot {
                policy: "fixed",
                timezone: None,
                window: None,
                sunrise: None,
                sunset: None,
                decision,
                next_poll_at,
            },
        }
    }
}

/// Resolve a local wall-clock time to UTC, stepping over DST gaps
pub fn local_to_utc(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map_or_else(|| Utc.from_utc_datetime(&naive), |t| t.with_timezone(&Utc)),
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn melbourne() -> SolarSchedule {
        SolarSchedule::new(
            -37.8136,
            144.9631,
            chrono_tz::Australia::Melbourne,
            &ScheduleConfig::default(),
        )
    }

    fn at(s: &SolarSchedule, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        local_to_utc(
            &s.tz,
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    #[test]
    fn gcd_of_common_intervals() {
        assert_eq!(gcd(30, 60), 30);
        assert_eq!(gcd(45, 60), 15);
        assert_eq!(gcd(60, 60), 60);
    }

    #[test]
    fn midday_slot_alignment() {
        let s = melbourne();
        let now = at(&s, 2024, 12, 21, 12, 10);
        let d = s.evaluate(now, Some(at(&s, 2024, 12, 21, 11, 45)));
        assert_eq!(d.kind, SlotKind::Active);
        assert!(d.due);
        assert_eq!(d.slot_start, Some(at(&s, 2024, 12, 21, 12, 0)));

        let d = s.evaluate(now, Some(at(&s, 2024, 12, 21, 12, 1)));
        assert!(!d.due);
    }

    #[test]
    fn local_to_utc_skips_dst_gap() {
        // Melbourne springs forward 02:00 -> 03:00 on 2024-10-06
        let tz = chrono_tz::Australia::Melbourne;
        let gap = NaiveDate::from_ymd_opt(2024, 10, 6)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = local_to_utc(&tz, gap);
        assert_eq!(resolved.with_timezone(&tz).hour(), 3);
    }
}
