//! Blocking HTTP client for the Google Smart Device Management API.
//!
//! - Uses `ureq` (no async); every call carries a fixed 15 s timeout.
//! - Exchanges the long-lived OAuth2 refresh token for a bearer token,
//!   then lists the enterprise's devices with it.
//! - Device records are kept as raw `serde_json::Value`s; the nested trait
//!   layout drifts upstream and is interpreted later by the extraction step.

use log::debug;
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE_URL: &str = "https://smartdevicemanagement.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub enum SdmClientError {
    /// Token endpoint answered with a non-success status.
    Auth { status: u16, body: String },
    /// Device listing answered with a non-success status.
    Fetch { status: u16, body: String },
    /// Transport-level failure (timeout, DNS, connection reset).
    Network(String),
    /// Response body was not the JSON we expected.
    Json(serde_json::Error),
    /// Token endpoint returned 2xx but no usable access token.
    MissingAccessToken,
}

impl Display for SdmClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SdmClientError::Auth { status, body } => {
                write!(f, "failed to refresh access token: http {}: {}", status, body)
            }
            SdmClientError::Fetch { status, body } => {
                write!(f, "failed to fetch devices: http {}: {}", status, body)
            }
            SdmClientError::Network(s) => write!(f, "network error: {}", s),
            SdmClientError::Json(e) => write!(f, "json error: {}", e),
            SdmClientError::MissingAccessToken => write!(f, "missing access_token in refresh response"),
        }
    }
}

impl std::error::Error for SdmClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdmClientError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SdmClientError {
    fn from(value: serde_json::Error) -> Self {
        SdmClientError::Json(value)
    }
}

pub struct SdmClient {
    agent: ureq::Agent,
    token_url: String,
    base_url: String,
}

impl Default for SdmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SdmClient {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        SdmClient {
            agent,
            token_url: TOKEN_URL.to_string(),
            base_url: API_BASE_URL.to_string(),
        }
    }

    /// Exchange the configured refresh token for a short-lived bearer token.
    pub fn refresh_access_token(&self, config: &crate::config::Config) -> Result<String, SdmClientError> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            access_token: Option<String>,
        }

        let resp = self
            .agent
            .post(&self.token_url)
            .set("Accept", "application/json")
            .send_form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("refresh_token", config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ]);

        let resp = match resp {
            Ok(r) => r,
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_else(|_| String::from("<no body>"));
                return Err(SdmClientError::Auth { status, body });
            }
            Err(ureq::Error::Transport(t)) => return Err(SdmClientError::Network(t.to_string())),
        };

        let token: TokenResponse = serde_json::from_reader(resp.into_reader())?;
        match token.access_token {
            Some(t) if !t.is_empty() => Ok(t),
            _ => Err(SdmClientError::MissingAccessToken),
        }
    }

    /// List the enterprise's devices. An enterprise with no devices is a
    /// valid empty result, not an error.
    pub fn fetch_devices(
        &self,
        config: &crate::config::Config,
        access_token: &str,
    ) -> Result<Vec<Value>, SdmClientError> {
        #[derive(serde::Deserialize)]
        struct DeviceListResponse {
            #[serde(default)]
            devices: Vec<Value>,
        }

        let url = format!("{}/enterprises/{}/devices", self.base_url, config.project_id);
        let resp = self
            .agent
            .get(&url)
            .set("Accept", "application/json")
            .set("Authorization", &format!("Bearer {}", access_token))
            .call();

        let resp = match resp {
            Ok(r) => r,
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_else(|_| String::from("<no body>"));
                return Err(SdmClientError::Fetch { status, body });
            }
            Err(ureq::Error::Transport(t)) => return Err(SdmClientError::Network(t.to_string())),
        };

        let payload: DeviceListResponse = serde_json::from_reader(resp.into_reader())?;
        debug!("Fetched {} device(s) from the SDM API", payload.devices.len());
        Ok(payload.devices)
    }
}
