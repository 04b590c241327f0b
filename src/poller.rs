//! Poll orchestration
//!
//! A single task owns every system's telemetry source. On each tick it asks
//! each system's schedule whether a poll is due, runs it, and otherwise
//! spends the tick on one throttled history backfill step. Manual polls and
//! shutdown arrive over a command channel.

use crate::backfill::next_backfill_day;
use crate::config::{Config, PollerConfig, Vendor};
use crate::enphase::{EnphaseClient, EnphaseSource};
use crate::error::{HelionError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger, get_logger_with_context};
use crate::schedule::{SchedulePolicy, SlotKind};
use crate::selectronic::{SelectLiveClient, SelectLiveSource};
use crate::source::TelemetrySource;
use crate::store::{PollReason, PollRun, RunOutcome, Store, SystemRecord};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};

/// Requests the web layer can make of the poller
#[derive(Debug)]
pub enum PollerCommand {
    /// Poll a system immediately, outside its schedule
    PollNow {
        system_id: String,
        reply: oneshot::Sender<Result<PollRun>>,
    },
    Shutdown,
}

/// What the poller did for one system on one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    CoolingDown,
    /// A poll is due but the last one failed too recently
    RetryBackoff,
    Polled(RunOutcome),
    Backfilled { day: NaiveDate, outcome: RunOutcome },
    BackfillComplete,
    Idle,
}

/// Loop pacing derived from `PollerConfig`
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub tick: std::time::Duration,
    pub backfill_enabled: bool,
    pub backfill_max_days: u32,
    pub backfill_interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub retry_backoff: Duration,
}

impl PollerSettings {
    pub fn from_config(cfg: &PollerConfig) -> Self {
        Self {
            tick: std::time::Duration::from_secs(cfg.tick_seconds.max(1)),
            backfill_enabled: cfg.backfill_enabled,
            backfill_max_days: cfg.backfill_max_days,
            backfill_interval: seconds(cfg.backfill_interval_seconds),
            rate_limit_cooldown: seconds(cfg.rate_limit_cooldown_seconds),
            retry_backoff: seconds(cfg.retry_backoff_seconds),
        }
    }
}

const MAX_SECONDS: i64 = 10 * 365 * 86_400;

/// Longest pause honoured from a vendor Retry-After
const MAX_RATE_LIMIT_PAUSE_HOURS: i64 = 24;

/// Longest wait between retries of a failing live poll
const MAX_RETRY_BACKOFF_MINUTES: i64 = 60;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_SECONDS))
}

/// Runtime state of one polled system
pub struct PolledSystem {
    id: String,
    policy: SchedulePolicy,
    tz: Tz,
    source: Box<dyn TelemetrySource>,
    last_poll: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    failed_attempts: u32,
    retry_not_before: Option<DateTime<Utc>>,
    last_backfill_at: Option<DateTime<Utc>>,
    logger: StructuredLogger,
}

impl PolledSystem {
    pub fn new(id: &str, policy: SchedulePolicy, tz: Tz, source: Box<dyn TelemetrySource>) -> Self {
        Self {
            id: id.to_string(),
            policy,
            tz,
            source,
            last_poll: None,
            cooldown_until: None,
            failed_attempts: 0,
            retry_not_before: None,
            last_backfill_at: None,
            logger: get_logger("poller").for_system(id),
        }
    }

    pub fn with_last_poll(mut self, last_poll: Option<DateTime<Utc>>) -> Self {
        self.last_poll = last_poll;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    fn retry_pending(&self, now: DateTime<Utc>) -> bool {
        self.retry_not_before.is_some_and(|at| now < at)
    }

    /// Space out retries of a failing live poll: base, 2x base, 4x base...
    fn schedule_retry(&mut self, now: DateTime<Utc>, base: Duration) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        let factor = 1i32 << self.failed_attempts.saturating_sub(1).min(16);
        let cap = Duration::minutes(MAX_RETRY_BACKOFF_MINUTES);
        let wait = base.checked_mul(factor).unwrap_or(cap).min(cap);
        self.retry_not_before = Some(now + wait);
        self.logger.debug(&format!(
            "Live poll failed {} time(s) in a row; next attempt after {}",
            self.failed_attempts,
            (now + wait).to_rfc3339()
        ));
    }

    fn note_failure(&mut self, err: &HelionError, now: DateTime<Utc>, default_cooldown: Duration) {
        if let HelionError::RateLimited {
            retry_after_secs, ..
        } = err
        {
            let pause = retry_after_secs
                .map_or(default_cooldown, seconds)
                .min(Duration::hours(MAX_RATE_LIMIT_PAUSE_HOURS));
            self.cooldown_until = Some(now + pause);
            self.logger.warn(&format!(
                "Rate limited; pausing until {}",
                (now + pause).to_rfc3339()
            ));
        }
    }

    /// Fetch and store live data; the previous local day too when asked
    async fn poll(
        &mut self,
        store: &Store,
        reason: PollReason,
        include_previous_day: bool,
        now: DateTime<Utc>,
        settings: &PollerSettings,
    ) -> PollRun {
        let run = PollRun::begin(&self.id, reason, now);
        let started = std::time::Instant::now();
        let yesterday = now.with_timezone(&self.tz).date_naive().pred_opt();

        let result: Result<usize> = async {
            let mut readings = self.source.fetch_latest().await?;
            if include_previous_day
                && self.source.supports_history()
                && let Some(day) = yesterday
            {
                readings.extend(self.source.fetch_day(day).await?);
            }
            store.insert_readings(&self.id, &readings)
        }
        .await;

        let finished = now + Duration::from_std(started.elapsed()).unwrap_or_default();
        let run = match result {
            Ok(written) => {
                self.last_poll = Some(now);
                self.cooldown_until = None;
                self.failed_attempts = 0;
                self.retry_not_before = None;
                self.logger.info(&format!(
                    "{} poll stored {} readings{}",
                    reason.as_str(),
                    written,
                    if include_previous_day {
                        " (with previous day)"
                    } else {
                        ""
                    }
                ));
                run.succeeded(finished, written as u64)
            }
            Err(e) => {
                get_logger_with_context(
                    LogContext::new("poller")
                        .with_system(&self.id)
                        .with_run_id(run.id.clone())
                        .with_field("reason", reason.as_str().to_string()),
                )
                .error(&format!("Poll failed: {}", e));
                self.note_failure(&e, now, settings.rate_limit_cooldown);
                if !matches!(e, HelionError::RateLimited { .. }) {
                    self.schedule_retry(now, settings.retry_backoff);
                }
                run.failed(finished, e.to_string())
            }
        };

        if let Err(e) = store.record_poll_run(&run) {
            self.logger
                .error(&format!("Failed to record poll run {}: {}", run.id, e));
        }
        run
    }

    /// One history step: the day before the backfill cursor
    async fn backfill_step(
        &mut self,
        store: &Store,
        settings: &PollerSettings,
        now: DateTime<Utc>,
    ) -> Result<Option<(NaiveDate, PollRun)>> {
        self.last_backfill_at = Some(now);
        let cursor = store.backfill_cursor(&self.id)?;
        if cursor.complete {
            return Ok(None);
        }

        let today = now.with_timezone(&self.tz).date_naive();
        let earliest = match self.source.earliest_day().await {
            Ok(day) => day,
            Err(e) => {
                self.note_failure(&e, now, settings.rate_limit_cooldown);
                return Err(e);
            }
        };

        let Some(day) = next_backfill_day(
            today,
            cursor.oldest_day,
            settings.backfill_max_days,
            earliest,
        ) else {
            store.mark_backfill_complete(&self.id)?;
            self.logger.info("History backfill complete");
            return Ok(None);
        };

        let run = PollRun::begin(&self.id, PollReason::Backfill, now);
        let started = std::time::Instant::now();
        let result: Result<usize> = async {
            let readings = self.source.fetch_day(day).await?;
            let written = store.insert_readings(&self.id, &readings)?;
            store.set_backfill_cursor(&self.id, day)?;
            Ok(written)
        }
        .await;

        let finished = now + Duration::from_std(started.elapsed()).unwrap_or_default();
        let run = match result {
            Ok(written) => {
                self.logger
                    .debug(&format!("Backfilled {} ({} readings)", day, written));
                run.succeeded(finished, written as u64)
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Backfill of {} failed: {}", day, e));
                self.note_failure(&e, now, settings.rate_limit_cooldown);
                run.failed(finished, e.to_string())
            }
        };
        store.record_poll_run(&run)?;
        Ok(Some((day, run)))
    }

    fn backfill_due(&self, settings: &PollerSettings, now: DateTime<Utc>) -> bool {
        settings.backfill_enabled
            && self.source.supports_history()
            && self
                .last_backfill_at
                .is_none_or(|at| now - at >= settings.backfill_interval)
    }
}

/// The polling loop
pub struct Poller {
    store: Arc<Store>,
    settings: PollerSettings,
    systems: Vec<PolledSystem>,
    commands_rx: mpsc::UnboundedReceiver<PollerCommand>,
    status_tx: broadcast::Sender<String>,
    logger: StructuredLogger,
}

impl Poller {
    pub fn new(
        store: Arc<Store>,
        settings: PollerSettings,
        systems: Vec<PolledSystem>,
        commands_rx: mpsc::UnboundedReceiver<PollerCommand>,
        status_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            store,
            settings,
            systems,
            commands_rx,
            status_tx,
            logger: get_logger("poller"),
        }
    }

    /// Build vendor sources for every enabled system in the configuration
    pub fn from_config(
        config: &Config,
        store: Arc<Store>,
        commands_rx: mpsc::UnboundedReceiver<PollerCommand>,
        status_tx: broadcast::Sender<String>,
    ) -> Result<Self> {
        let systems = build_systems(config, &store)?;
        Ok(Self::new(
            store,
            PollerSettings::from_config(&config.poller),
            systems,
            commands_rx,
            status_tx,
        ))
    }

    pub fn system_ids(&self) -> Vec<String> {
        self.systems.iter().map(|s| s.id().to_string()).collect()
    }

    pub async fn run(mut self) -> Result<()> {
        self.logger.info(&format!(
            "Poller started for {} system(s), tick {}s",
            self.systems.len(),
            self.settings.tick.as_secs()
        ));
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once(Utc::now()).await;
                }
                cmd = self.commands_rx.recv() => match cmd {
                    Some(PollerCommand::PollNow { system_id, reply }) => {
                        let result = self.poll_now(&system_id, Utc::now()).await;
                        let _ = reply.send(result);
                    }
                    Some(PollerCommand::Shutdown) | None => {
                        self.logger.info("Poller shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate every system once
    pub async fn tick_once(&mut self, now: DateTime<Utc>) -> Vec<(String, TickAction)> {
        let mut actions = Vec::with_capacity(self.systems.len());
        for idx in 0..self.systems.len() {
            let action = self.tick_system(idx, now).await;
            actions.push((self.systems[idx].id.clone(), action));
        }
        actions
    }

    async fn tick_system(&mut self, idx: usize, now: DateTime<Utc>) -> TickAction {
        let store = Arc::clone(&self.store);
        let system = &mut self.systems[idx];

        if system.cooling_down(now) {
            return TickAction::CoolingDown;
        }

        let decision = system.policy.evaluate(now, system.last_poll);
        if decision.due {
            if system.retry_pending(now) {
                return TickAction::RetryBackoff;
            }
            let reason = if decision.kind == SlotKind::Correction {
                PollReason::Correction
            } else {
                PollReason::Scheduled
            };
            let run = system
                .poll(
                    &store,
                    reason,
                    decision.include_previous_day,
                    now,
                    &self.settings,
                )
                .await;
            let outcome = run.outcome;
            publish(&self.status_tx, &run);
            return TickAction::Polled(outcome);
        }

        if !system.backfill_due(&self.settings, now) {
            return TickAction::Idle;
        }
        match system.backfill_step(&store, &self.settings, now).await {
            Ok(Some((day, run))) => {
                let outcome = run.outcome;
                publish(&self.status_tx, &run);
                TickAction::Backfilled { day, outcome }
            }
            Ok(None) => TickAction::BackfillComplete,
            Err(e) => {
                system
                    .logger
                    .warn(&format!("Backfill step skipped: {}", e));
                TickAction::Idle
            }
        }
    }

    /// Manual poll requested through the API
    pub async fn poll_now(&mut self, system_id: &str, now: DateTime<Utc>) -> Result<PollRun> {
        let store = Arc::clone(&self.store);
        let system = self
            .systems
            .iter_mut()
            .find(|s| s.id == system_id)
            .ok_or_else(|| HelionError::not_found(format!("system '{}'", system_id)))?;

        if let Some(until) = system.cooldown_until
            && now < until
        {
            let remaining = u64::try_from((until - now).num_seconds()).unwrap_or(0);
            return Err(HelionError::rate_limited(
                format!("system '{}' is cooling down after a rate limit", system_id),
                Some(remaining),
            ));
        }

        let run = system
            .poll(&store, PollReason::Manual, false, now, &self.settings)
            .await;
        publish(&self.status_tx, &run);
        Ok(run)
    }
}

fn publish(status_tx: &broadcast::Sender<String>, run: &PollRun) {
    let event = serde_json::json!({ "event": "poll_run", "run": run });
    // No subscribers is fine
    let _ = status_tx.send(event.to_string());
}

/// Mirror configured systems into the store
pub fn sync_systems(config: &Config, store: &Store) -> Result<()> {
    for system in &config.systems {
        let tz = config.system_timezone(system)?;
        store.upsert_system(&SystemRecord::from_config(system, tz.name()))?;
    }
    Ok(())
}

fn build_systems(config: &Config, store: &Arc<Store>) -> Result<Vec<PolledSystem>> {
    let timeout = std::time::Duration::from_secs(config.poller.request_timeout_seconds);
    let margin = seconds(config.enphase.token_refresh_margin_seconds);

    let mut systems = Vec::new();
    for system in config.systems.iter().filter(|s| s.enabled) {
        let tz = config.system_timezone(system)?;
        let policy = SchedulePolicy::for_system(config, system)?;
        let source: Box<dyn TelemetrySource> = match system.vendor {
            Vendor::Enphase => Box::new(EnphaseSource::new(
                EnphaseClient::new(&config.enphase, timeout)?,
                Arc::clone(store),
                &system.id,
                &system.site_id,
                tz,
                margin,
                system.refresh_token.clone(),
            )),
            Vendor::Selectronic => Box::new(SelectLiveSource::new(
                SelectLiveClient::new(&config.selectronic, timeout)?,
                &system.site_id,
            )),
        };
        store.register_points(&system.id, source.points())?;
        let last_poll = store.last_successful_poll(&system.id)?;
        systems.push(PolledSystem::new(&system.id, policy, tz, source).with_last_poll(last_poll));
    }
    Ok(systems)
}
