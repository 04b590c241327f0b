use chrono::{DateTime, Duration, NaiveDate, Utc};
use helion::config::{EnphaseConfig, SystemConfig, Vendor};
use helion::credentials::OAuthToken;
use helion::enphase::{EnphaseClient, EnphaseSource};
use helion::source::TelemetrySource;
use helion::store::{Store, SystemRecord};
use mockito::{Matcher, Server};
use std::sync::Arc;

// 2024-06-01T00:00:00Z
const DAY_START: i64 = 1_717_200_000;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn store() -> Arc<Store> {
    let store = Store::open_in_memory().unwrap();
    let system = SystemConfig {
        id: "roof".to_string(),
        name: String::new(),
        vendor: Vendor::Enphase,
        site_id: "42".to_string(),
        latitude: 0.0,
        longitude: 0.0,
        timezone: None,
        enabled: true,
        refresh_token: None,
    };
    store
        .upsert_system(&SystemRecord::from_config(&system, "UTC"))
        .unwrap();
    Arc::new(store)
}

fn source(url: String, store: Arc<Store>, seed: Option<&str>) -> EnphaseSource {
    let cfg = EnphaseConfig {
        base_url: url,
        api_key: "key123".into(),
        client_id: "cid".into(),
        client_secret: "secret".into(),
        token_refresh_margin_seconds: 300,
    };
    EnphaseSource::new(
        EnphaseClient::new(&cfg, std::time::Duration::from_secs(5)).unwrap(),
        store,
        "roof",
        "42",
        chrono_tz::UTC,
        Duration::minutes(5),
        seed.map(str::to_string),
    )
}

fn production_body() -> String {
    format!(
        r#"{{"system_id":42,"granularity":"day","total_devices":10,"start_at":{s},"end_at":{e},
            "intervals":[{{"end_at":{a},"devices_reporting":10,"powr":800,"enwh":200}},
                         {{"end_at":{b},"devices_reporting":10,"powr":1200,"enwh":300}}]}}"#,
        s = DAY_START,
        e = DAY_START + 86_400,
        a = DAY_START + 43_200,
        b = DAY_START + 44_100,
    )
}

fn token_body(access: &str, refresh: &str) -> String {
    format!(
        r#"{{"access_token":"{}","refresh_token":"{}","expires_in":86400,"token_type":"bearer"}}"#,
        access, refresh
    )
}

#[tokio::test]
async fn expired_access_token_is_refreshed_after_401() {
    let mut server = Server::new_async().await;
    let store = store();
    store
        .save_credentials(
            "roof",
            &OAuthToken {
                access_token: "stale".into(),
                refresh_token: "r1".into(),
                expires_at: Utc::now() + Duration::hours(6),
            },
        )
        .unwrap();

    let rejected = server
        .mock("GET", "/api/v4/systems/42/telemetry/production_micro")
        .match_header("authorization", "Bearer stale")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/oauth/token")
        .match_query(Matcher::UrlEncoded("refresh_token".into(), "r1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body("fresh", "r2"))
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/api/v4/systems/42/telemetry/production_micro")
        .match_header("authorization", "Bearer fresh")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("key".into(), "key123".into()),
            Matcher::UrlEncoded("start_at".into(), DAY_START.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(production_body())
        .expect(1)
        .create_async()
        .await;

    let mut src = source(server.url(), Arc::clone(&store), None);
    let readings = src.fetch_day(day()).await.unwrap();

    let total = readings
        .iter()
        .find(|r| r.point == "solar_energy_today_wh")
        .unwrap();
    assert_eq!(total.value, 500.0);
    assert_eq!(readings.iter().filter(|r| r.point == "solar_w").count(), 2);

    let saved = store.load_credentials("roof").unwrap().unwrap();
    assert_eq!(saved.access_token, "fresh");
    assert_eq!(saved.refresh_token, "r2");

    rejected.assert_async().await;
    refresh.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn configured_refresh_token_seeds_the_store() {
    let mut server = Server::new_async().await;
    let store = store();

    let refresh = server
        .mock("POST", "/oauth/token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "seed-rt".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"a1","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let _production = server
        .mock("GET", "/api/v4/systems/42/telemetry/production_micro")
        .match_header("authorization", "Bearer a1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(production_body())
        .create_async()
        .await;

    let mut src = source(server.url(), Arc::clone(&store), Some("seed-rt"));
    src.fetch_day(day()).await.unwrap();
    // Second fetch reuses the cached access token
    src.fetch_day(day()).await.unwrap();

    let saved = store.load_credentials("roof").unwrap().unwrap();
    assert_eq!(saved.access_token, "a1");
    // The grant omitted a new refresh token so the seed is kept
    assert_eq!(saved.refresh_token, "seed-rt");
    refresh.assert_async().await;
}

#[tokio::test]
async fn missing_credentials_is_an_auth_error() {
    let server = Server::new_async().await;
    let mut src = source(server.url(), store(), None);
    let err = src.fetch_day(day()).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn earliest_day_comes_from_summary_once() {
    let mut server = Server::new_async().await;
    let store = store();
    store
        .save_credentials(
            "roof",
            &OAuthToken {
                access_token: "a1".into(),
                refresh_token: "r1".into(),
                expires_at: Utc::now() + Duration::hours(6),
            },
        )
        .unwrap();

    // 2021-01-01T08:00:00Z
    let summary = server
        .mock("GET", "/api/v4/systems/42/summary")
        .match_query(Matcher::UrlEncoded("key".into(), "key123".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"system_id":42,"operational_at":1609488000,"status":"normal"}"#)
        .expect(1)
        .create_async()
        .await;

    let expected = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let mut src = source(server.url(), Arc::clone(&store), None);
    assert_eq!(src.earliest_day().await.unwrap(), Some(expected));
    assert_eq!(src.earliest_day().await.unwrap(), Some(expected));

    // A fresh source finds it in the store
    let mut again = source(server.url(), Arc::clone(&store), None);
    assert_eq!(again.earliest_day().await.unwrap(), Some(expected));
    assert_eq!(
        store.get_system("roof").unwrap().unwrap().earliest_day,
        Some(expected)
    );
    summary.assert_async().await;
}

#[tokio::test]
async fn rejected_refresh_token_surfaces_as_auth() {
    let mut server = Server::new_async().await;
    let store = store();
    store
        .save_credentials(
            "roof",
            &OAuthToken {
                access_token: "old".into(),
                refresh_token: "revoked".into(),
                expires_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            },
        )
        .unwrap();
    let _refresh = server
        .mock("POST", "/oauth/token")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;

    let mut src = source(server.url(), store, None);
    assert!(src.fetch_latest().await.unwrap_err().is_auth());
}
