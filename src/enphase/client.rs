use crate::config::EnphaseConfig;
use crate::credentials::TokenGrant;
use crate::enphase::types::{ProductionMicro, SystemSummary};
use crate::error::{HelionError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Response, StatusCode};
use std::time::Duration;

const CLIENT_USER_AGENT: &str = concat!("helion/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper over the Enlighten v4 REST endpoints
#[derive(Debug, Clone)]
pub struct EnphaseClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    client_id: String,
    client_secret: String,
}

impl EnphaseClient {
    pub fn new(cfg: &EnphaseConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
        })
    }

    /// Trade a refresh token for a new access token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Exchange an authorization code from the consent redirect
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ])
        .await
    }

    async fn token_request(&self, query: &[(&str, &str)]) -> Result<TokenGrant> {
        let resp = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .query(query)
            .send()
            .await?;
        let resp = check_status(resp, "token").await?;
        Ok(resp.json::<TokenGrant>().await?)
    }

    pub async fn summary(&self, site_id: &str, access_token: &str) -> Result<SystemSummary> {
        let resp = self
            .http
            .get(format!("{}/api/v4/systems/{}/summary", self.base_url, site_id))
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        let resp = check_status(resp, "summary").await?;
        Ok(resp.json::<SystemSummary>().await?)
    }

    /// Micro-inverter production for the day starting at `start_at` (epoch seconds)
    pub async fn production_micro(
        &self,
        site_id: &str,
        access_token: &str,
        start_at: i64,
    ) -> Result<ProductionMicro> {
        let start = start_at.to_string();
        let resp = self
            .http
            .get(format!(
                "{}/api/v4/systems/{}/telemetry/production_micro",
                self.base_url, site_id
            ))
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .query(&[
                ("key", self.api_key.as_str()),
                ("start_at", start.as_str()),
                ("granularity", "day"),
            ])
            .send()
            .await?;
        let resp = check_status(resp, "production_micro").await?;
        Ok(resp.json::<ProductionMicro>().await?)
    }
}

/// Map vendor HTTP status codes onto crate errors
async fn check_status(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(HelionError::auth(format!(
            "Enphase {} rejected credentials",
            what
        ))),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            Err(HelionError::rate_limited(
                format!("Enphase {} rate limited", what),
                retry_after,
            ))
        }
        _ => {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            Err(HelionError::api(format!(
                "Enphase {} failed with {}: {}",
                what, status, snippet
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(url: String) -> EnphaseClient {
        let cfg = EnphaseConfig {
            base_url: url,
            api_key: "key123".into(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            token_refresh_margin_seconds: 300,
        };
        EnphaseClient::new(&cfg, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn refresh_uses_basic_auth_and_query() {
        let mut server = Server::new_async().await;
        // base64("cid:secret")
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("authorization", "Basic Y2lkOnNlY3JldA==")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a1","refresh_token":"r2","expires_in":86400}"#)
            .create_async()
            .await;

        let grant = client_for(server.url()).refresh_token("r1").await.unwrap();
        assert_eq!(grant.access_token, "a1");
        assert_eq!(grant.refresh_token.as_deref(), Some("r2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v4/systems/42/summary")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "120")
            .create_async()
            .await;

        let err = client_for(server.url())
            .summary("42", "tok")
            .await
            .unwrap_err();
        match err {
            HelionError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, Some(120)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v4/systems/42/summary")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = client_for(server.url())
            .summary("42", "stale")
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }
}
