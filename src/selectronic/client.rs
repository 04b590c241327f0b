use crate::config::SelectronicConfig;
use crate::error::{HelionError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::selectronic::types::HfDataResponse;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use std::time::Duration;

const CLIENT_USER_AGENT: &str = concat!("helion/", env!("CARGO_PKG_VERSION"));

/// Select.Live portal session
///
/// The portal has no API tokens; it authenticates a browser-style form login
/// and keeps the session in a cookie.
pub struct SelectLiveClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    logged_in: bool,
    logger: StructuredLogger,
}

enum Fetch {
    Data(Box<HfDataResponse>),
    SessionExpired,
}

impl SelectLiveClient {
    pub fn new(cfg: &SelectronicConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            email: cfg.email.clone(),
            password: cfg.password.clone(),
            logged_in: false,
            logger: get_logger("selectronic"),
        })
    }

    pub async fn login(&mut self) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/login", self.base_url))
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .form(&[("email", self.email.as_str()), ("pwd", self.password.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.logged_in = false;
            return Err(HelionError::auth("Select.Live rejected the login"));
        }
        if !status.is_success() {
            self.logged_in = false;
            return Err(HelionError::api(format!(
                "Select.Live login failed with {}",
                status
            )));
        }
        self.logged_in = true;
        self.logger.debug("Logged in to Select.Live");
        Ok(())
    }

    /// Live data of one device, logging in again once if the session lapsed
    pub async fn hfdata(&mut self, device_id: &str) -> Result<HfDataResponse> {
        if !self.logged_in {
            self.login().await?;
        }
        if let Fetch::Data(data) = self.fetch_hfdata(device_id).await? {
            return Ok(*data);
        }

        self.logger.info("Select.Live session expired; logging in again");
        self.logged_in = false;
        self.login().await?;
        match self.fetch_hfdata(device_id).await? {
            Fetch::Data(data) => Ok(*data),
            Fetch::SessionExpired => {
                self.logged_in = false;
                Err(HelionError::auth(
                    "Select.Live session rejected right after login",
                ))
            }
        }
    }

    async fn fetch_hfdata(&self, device_id: &str) -> Result<Fetch> {
        let resp = self
            .http
            .get(format!("{}/dashboard/hfdata/{}", self.base_url, device_id))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Fetch::SessionExpired);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(HelionError::rate_limited("Select.Live rate limited", None));
        }
        if !status.is_success() {
            return Err(HelionError::api(format!(
                "Select.Live hfdata failed with {}",
                status
            )));
        }

        // An expired session is answered with the HTML login page
        let body = resp.text().await?;
        match serde_json::from_str::<HfDataResponse>(&body) {
            Ok(data) => Ok(Fetch::Data(Box::new(data))),
            Err(_) if !body.trim_start().starts_with('{') => Ok(Fetch::SessionExpired),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(url: String) -> SelectLiveClient {
        let cfg = SelectronicConfig {
            base_url: url,
            email: "me@example.com".into(),
            password: "pw".into(),
            poll_interval_seconds: 60,
        };
        SelectLiveClient::new(&cfg, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn login_posts_form() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/login")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("email".into(), "me@example.com".into()),
                Matcher::UrlEncoded("pwd".into(), "pw".into()),
            ]))
            .with_status(200)
            .with_header("set-cookie", "session=abc; Path=/")
            .create_async()
            .await;

        let mut client = client_for(server.url());
        client.login().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bad_login_is_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/login")
            .with_status(401)
            .create_async()
            .await;

        let err = client_for(server.url()).login().await.unwrap_err();
        assert!(err.is_auth());
    }
}
