use super::*;

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/data/helion.db".to_string(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            web_level: None,
            file: "/tmp/helion.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            request_timeout_seconds: 15,
            backfill_enabled: true,
            backfill_max_days: 30,
            backfill_interval_seconds: 300,
            rate_limit_cooldown_seconds: 900,
            retry_backoff_seconds: 300,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            dawn_offset_minutes: 30,
            dusk_offset_minutes: 30,
            active_interval_minutes: 30,
            correction_start_hour: 1,
            correction_end_hour: 5,
        }
    }
}

impl Default for EnphaseConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.enphaseenergy.com".to_string(),
            api_key: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            token_refresh_margin_seconds: 300,
        }
    }
}

impl Default for SelectronicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://select.live".to_string(),
            email: String::new(),
            password: String::new(),
            poll_interval_seconds: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            database: DatabaseConfig::default(),
            web: WebConfig::default(),
            logging: LoggingConfig::default(),
            poller: PollerConfig::default(),
            schedule: ScheduleConfig::default(),
            enphase: EnphaseConfig::default(),
            selectronic: SelectronicConfig::default(),
            systems: Vec::new(),
        }
    }
}
