use helion::config::{Config, SystemConfig, Vendor};
use std::fs;

fn system(id: &str, vendor: Vendor) -> SystemConfig {
    SystemConfig {
        id: id.to_string(),
        name: format!("{} system", id),
        vendor,
        site_id: "1234".to_string(),
        latitude: -37.81,
        longitude: 144.96,
        timezone: None,
        enabled: true,
        refresh_token: None,
    }
}

fn enphase_ready() -> Config {
    let mut cfg = Config::default();
    cfg.timezone = "Australia/Melbourne".to_string();
    cfg.enphase.api_key = "key".to_string();
    cfg.enphase.client_id = "cid".to_string();
    cfg.enphase.client_secret = "secret".to_string();
    cfg.systems.push(system("roof", Vendor::Enphase));
    cfg
}

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = enphase_ready();
    cfg.database.path = tmp_dir.path().join("helion.db").to_string_lossy().to_string();
    cfg.systems[0].timezone = Some("Australia/Perth".to_string());

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.database.path, cfg.database.path);
    assert_eq!(loaded.systems.len(), 1);
    assert_eq!(loaded.systems[0].vendor, Vendor::Enphase);
    assert_eq!(loaded.systems[0].timezone.as_deref(), Some("Australia/Perth"));
    assert!(loaded.validate().is_ok());
}

#[test]
fn minimal_yaml_fills_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        "selectronic:\n  email: me@example.com\n  password: pw\nsystems:\n  - id: shed\n    vendor: selectronic\n    site_id: \"42\"\n    latitude: -33.9\n    longitude: 151.2\n",
    )
    .unwrap();
    let cfg = Config::from_file(tmp.path()).unwrap();

    assert_eq!(cfg.web.port, 8090);
    assert_eq!(cfg.schedule.active_interval_minutes, 30);
    assert_eq!(cfg.poller.backfill_max_days, 30);
    assert!(cfg.systems[0].enabled);
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    assert!(Config::default().validate().is_ok());

    let mut cfg = Config::default();
    cfg.timezone = "Mars/Olympus".to_string();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.web.port = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.schedule.active_interval_minutes = 7;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.schedule.correction_start_hour = 5;
    cfg.schedule.correction_end_hour = 1;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.poller.tick_seconds = 0;
    assert!(cfg.validate().is_err());

    // Enphase systems need API credentials
    cfg = enphase_ready();
    cfg.enphase.api_key.clear();
    assert!(cfg.validate().is_err());

    cfg = enphase_ready();
    cfg.systems.push(system("roof", Vendor::Enphase));
    assert!(cfg.validate().is_err());

    cfg = enphase_ready();
    cfg.systems[0].latitude = 91.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.systems.push(system("shed", Vendor::Selectronic));
    assert!(cfg.validate().is_err());
}

#[test]
fn disabled_systems_do_not_require_credentials() {
    let mut cfg = Config::default();
    let mut s = system("roof", Vendor::Enphase);
    s.enabled = false;
    cfg.systems.push(s);
    assert!(cfg.validate().is_ok());
}

#[test]
fn redacted_hides_secrets() {
    let mut cfg = enphase_ready();
    cfg.selectronic.password = "hunter2".to_string();
    cfg.systems[0].refresh_token = Some("rt-secret".to_string());

    let red = cfg.redacted();
    let yaml = serde_yaml::to_string(&red).unwrap();
    assert!(!yaml.contains("hunter2"));
    assert!(!yaml.contains("rt-secret"));
    assert_ne!(red.enphase.client_secret, "secret");
    assert_eq!(red.enphase.client_id, "cid");
}

#[test]
fn system_timezone_falls_back_to_global() {
    let mut cfg = enphase_ready();
    let tz = cfg.system_timezone(&cfg.systems[0]).unwrap();
    assert_eq!(tz.name(), "Australia/Melbourne");

    cfg.systems[0].timezone = Some("Pacific/Auckland".to_string());
    let tz = cfg.system_timezone(&cfg.systems[0]).unwrap();
    assert_eq!(tz.name(), "Pacific/Auckland");
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn zero_poller_intervals_are_rejected() {
    let field_of = |cfg: &Config| match cfg.validate().unwrap_err() {
        helion::HelionError::Validation { field, .. } => field,
        other => panic!("unexpected error: {other}"),
    };

    let mut cfg = Config::default();
    cfg.poller.backfill_interval_seconds = 0;
    assert_eq!(field_of(&cfg), "poller.backfill_interval_seconds");

    cfg = Config::default();
    cfg.poller.rate_limit_cooldown_seconds = 0;
    assert_eq!(field_of(&cfg), "poller.rate_limit_cooldown_seconds");

    cfg = Config::default();
    cfg.poller.retry_backoff_seconds = 0;
    assert_eq!(field_of(&cfg), "poller.retry_backoff_seconds");
}
