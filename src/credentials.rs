//! OAuth token bookkeeping
//!
//! Enphase access tokens live for about a day and refresh tokens for about a
//! month. The poller refreshes ahead of expiry so a scheduled poll never has
//! to fail first.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lead time before expiry at which a token gets refreshed
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// Access/refresh token pair with its expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Body of an OAuth token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl OAuthToken {
    /// Token whose access part is unknown; forces a refresh before first use
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: DateTime::<Utc>::default(),
        }
    }

    /// Build a token from a grant, keeping `previous_refresh` when the
    /// response does not rotate it
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>, previous_refresh: Option<&str>) -> Self {
        let refresh_token = grant
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();
        Self {
            access_token: grant.access_token,
            refresh_token,
            expires_at: now + Duration::seconds(grant.expires_in.max(0)),
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.access_token.is_empty() || now + margin >= self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}
