//! Notification sinks
//!
//! The bridge only needs "send this named event with this JSON payload
//! within this timeout". [`SupervisorSink`] implements that against the
//! Home Assistant Supervisor proxy of the Core events API.

use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Base URL of the Core API as seen from inside an add-on container
pub const SUPERVISOR_API_URL: &str = "http://supervisor/core/api";

/// Response bodies longer than this are cut in logs
const MAX_BODY_LOG: usize = 180;

const TOKEN_ENV_VARS: &[&str] = &["SUPERVISOR_TOKEN", "HASSIO_TOKEN"];

const TOKEN_FILES: &[&str] = &[
    "/run/s6/container_environment/SUPERVISOR_TOKEN",
    "/run/s6/container_environment/HASSIO_TOKEN",
];

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("status={status} body='{body}'")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("missing SUPERVISOR_TOKEN/HASSIO_TOKEN")]
    MissingToken,
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl SinkError {
    /// Key used to throttle repeated logs of the same failure
    pub fn signature(&self) -> String {
        match self {
            SinkError::Timeout(_) => "post|timeout".to_string(),
            SinkError::Status { status, .. } => format!("post|status|{}", status),
            SinkError::Transport(msg) => format!("post|transport|{}", msg),
            SinkError::MissingToken => "post|token".to_string(),
            SinkError::Client(_) => "post|client".to_string(),
        }
    }
}

/// Destination for logical button events
pub trait NotificationSink: Send + 'static {
    fn post(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), SinkError>;
}

/// Posts events to `<base>/events/<event_type>` with a bearer token
pub struct SupervisorSink {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl SupervisorSink {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Sink for the Supervisor proxy using the token from the environment
    pub fn from_env() -> Result<Self, SinkError> {
        let token = supervisor_token().ok_or(SinkError::MissingToken)?;
        Self::new(SUPERVISOR_API_URL, token)
    }

    pub fn event_url(&self, event_type: &str) -> String {
        format!("{}/events/{}", self.base_url, event_type)
    }
}

impl NotificationSink for SupervisorSink {
    fn post(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.event_url(event_type))
            .bearer_auth(&self.token)
            .json(payload)
            .timeout(timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(timeout)
                } else {
                    SinkError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

/// Token from the environment, falling back to the s6 container environment
pub fn supervisor_token() -> Option<String> {
    TOKEN_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .chain(
            TOKEN_FILES
                .iter()
                .filter_map(|path| fs::read_to_string(path).ok()),
        )
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

/// Single-line body excerpt for logs
pub fn truncate_body(body: &str) -> String {
    let flat = body.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() > MAX_BODY_LOG {
        let cut: String = flat.chars().take(MAX_BODY_LOG - 3).collect();
        format!("{}...", cut)
    } else {
        flat.to_string()
    }
}
