use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use helion::config::{Config, ScheduleConfig, SystemConfig, Vendor};
use helion::schedule::{SchedulePolicy, SlotKind, SolarSchedule, local_to_utc};

fn schedule(lat: f64, lon: f64, tz: Tz) -> SolarSchedule {
    SolarSchedule::new(lat, lon, tz, &ScheduleConfig::default())
}

fn melbourne() -> SolarSchedule {
    schedule(-37.8136, 144.9631, chrono_tz::Australia::Melbourne)
}

fn local(s: &SolarSchedule, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    local_to_utc(
        &s.tz,
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap(),
    )
}

#[test]
fn melbourne_midday_is_active() {
    let s = melbourne();
    let d = s.evaluate(local(&s, 2024, 12, 21, 12, 0), None);
    assert_eq!(d.kind, SlotKind::Active);
    assert!(d.due);
    assert!(!d.include_previous_day);
    assert_eq!(d.slot_start, Some(local(&s, 2024, 12, 21, 12, 0)));
}

#[test]
fn melbourne_window_follows_twilight() {
    let s = melbourne();
    let w = s
        .window_for(NaiveDate::from_ymd_opt(2024, 12, 21).unwrap())
        .unwrap();
    // Civil dawn is around 05:20 and civil dusk around 21:15 local
    assert!(w.start > local(&s, 2024, 12, 21, 5, 30));
    assert!(w.start < local(&s, 2024, 12, 21, 6, 15));
    assert!(w.end > local(&s, 2024, 12, 21, 21, 20));
    assert!(w.end < local(&s, 2024, 12, 21, 22, 10));
}

#[test]
fn melbourne_early_morning_is_correction() {
    let s = melbourne();
    let now = local(&s, 2024, 12, 21, 3, 10);

    let d = s.evaluate(now, Some(local(&s, 2024, 12, 21, 2, 5)));
    assert_eq!(d.kind, SlotKind::Correction);
    assert!(d.due);
    assert!(d.include_previous_day);
    assert_eq!(d.slot_start, Some(local(&s, 2024, 12, 21, 3, 0)));

    // Already corrected this hour
    let d = s.evaluate(now, Some(local(&s, 2024, 12, 21, 3, 1)));
    assert!(!d.due);
}

#[test]
fn melbourne_night_and_pre_dawn_are_idle() {
    let s = melbourne();
    for (h, m) in [(23, 30), (0, 30), (5, 30)] {
        let d = s.evaluate(local(&s, 2024, 12, 21, h, m), None);
        assert_eq!(d.kind, SlotKind::Idle, "{:02}:{:02}", h, m);
        assert!(!d.due);
    }
}

#[test]
fn melbourne_after_dawn_is_active() {
    let s = melbourne();
    let d = s.evaluate(local(&s, 2024, 12, 21, 6, 30), None);
    assert_eq!(d.kind, SlotKind::Active);
    assert!(d.due);
}

#[test]
fn next_poll_is_the_following_slot() {
    let s = melbourne();
    let now = local(&s, 2024, 12, 21, 12, 10);
    let next = s.next_poll_at(now, Some(local(&s, 2024, 12, 21, 12, 5)));
    assert_eq!(next, Some(local(&s, 2024, 12, 21, 12, 30)));
}

#[test]
fn next_poll_after_dusk_is_the_correction_hour() {
    let s = melbourne();
    let now = local(&s, 2024, 12, 21, 23, 30);
    let next = s.next_poll_at(now, Some(local(&s, 2024, 12, 21, 21, 40)));
    assert_eq!(next, Some(local(&s, 2024, 12, 22, 1, 0)));
}

#[test]
fn next_poll_is_now_when_due() {
    let s = melbourne();
    let now = local(&s, 2024, 12, 21, 12, 10);
    assert_eq!(s.next_poll_at(now, None), Some(now));
}

#[test]
fn polar_day_polls_around_the_clock() {
    let s = schedule(69.6492, 18.9553, chrono_tz::Europe::Oslo);
    let d = s.evaluate(local(&s, 2024, 6, 21, 23, 45), None);
    assert_eq!(d.kind, SlotKind::Active);
    assert!(d.due);

    // Correction hours overlap the active window; previous day still gets fetched
    let d = s.evaluate(local(&s, 2024, 6, 21, 2, 10), None);
    assert_eq!(d.kind, SlotKind::Active);
    assert!(d.include_previous_day);
}

#[test]
fn polar_night_only_runs_corrections() {
    let s = schedule(78.2232, 15.6267, chrono_tz::Arctic::Longyearbyen);
    let date = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
    assert!(s.window_for(date).is_none());

    let d = s.evaluate(local(&s, 2024, 12, 21, 12, 0), None);
    assert_eq!(d.kind, SlotKind::Idle);
    assert!(!d.due);

    let d = s.evaluate(local(&s, 2024, 12, 21, 2, 30), None);
    assert_eq!(d.kind, SlotKind::Correction);
    assert!(d.due);

    let next = s.next_poll_at(local(&s, 2024, 12, 21, 12, 0), None);
    assert_eq!(next, Some(local(&s, 2024, 12, 22, 1, 0)));
}

#[test]
fn helsinki_summer_window_runs_past_midnight() {
    let s = schedule(60.1699, 24.9384, chrono_tz::Europe::Helsinki);
    let w = s
        .window_for(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap())
        .unwrap();
    assert!(w.end > local(&s, 2024, 6, 11, 0, 0));

    // Still inside the 10th's window after local midnight
    let after_midnight = local(&s, 2024, 6, 11, 0, 40);
    let d = s.evaluate(after_midnight, Some(local(&s, 2024, 6, 10, 23, 50)));
    assert_eq!(d.kind, SlotKind::Active);
    assert!(d.due);
    assert_eq!(d.slot_start, Some(local(&s, 2024, 6, 11, 0, 30)));

    let next = s.next_poll_at(
        local(&s, 2024, 6, 10, 23, 50),
        Some(local(&s, 2024, 6, 10, 23, 31)),
    );
    assert_eq!(next, Some(local(&s, 2024, 6, 11, 0, 0)));
}

#[test]
fn repeated_hour_after_dst_fall_back_is_its_own_slot() {
    // Melbourne falls back 03:00 -> 02:00 on 2024-04-07
    let s = melbourne();
    let first = "2024-04-06T15:05:00Z".parse::<DateTime<Utc>>().unwrap();
    let second = first + Duration::hours(1);
    assert_eq!(first.with_timezone(&s.tz).hour(), 2);
    assert_eq!(second.with_timezone(&s.tz).hour(), 2);

    let d = s.evaluate(second, Some(first));
    assert_eq!(d.kind, SlotKind::Correction);
    assert!(d.due);
    assert_eq!(d.slot_start, Some(second - Duration::minutes(5)));

    let d = s.evaluate(first + Duration::minutes(30), Some(first));
    assert!(!d.due);
}

#[test]
fn selectronic_systems_use_a_fixed_interval() {
    let mut cfg = Config::default();
    cfg.selectronic.poll_interval_seconds = 120;
    let system = SystemConfig {
        id: "shed".to_string(),
        name: String::new(),
        vendor: Vendor::Selectronic,
        site_id: "42".to_string(),
        latitude: -33.9,
        longitude: 151.2,
        timezone: None,
        enabled: true,
        refresh_token: None,
    };
    let policy = SchedulePolicy::for_system(&cfg, &system).unwrap();
    let now = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let d = policy.evaluate(now, Some(now - Duration::seconds(60)));
    assert_eq!(d.kind, SlotKind::Fixed);
    assert!(!d.due);
    assert!(policy.evaluate(now, Some(now - Duration::seconds(120))).due);
    assert!(policy.evaluate(now, None).due);

    assert_eq!(
        policy.next_poll_at(now, Some(now - Duration::seconds(60))),
        Some(now + Duration::seconds(60))
    );
    let snap = policy.snapshot(now, None);
    assert_eq!(snap.policy, "fixed");
    assert!(snap.window.is_none());
}
