//! Asynchronous client for the acquisition device's REST surface: session
//! login, system-state queries, and job detail lookups. Network failures
//! and non-2xx statuses surface as `DeviceApiError`; retry policy belongs
//! to the caller.

use fdc_core::{JobDetail, SystemState};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl DeviceApiError {
    /// True when the device rejected our session token, meaning the
    /// console should consider itself logged out.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            DeviceApiError::UnexpectedStatus { status, .. }
                if *status == reqwest::StatusCode::UNAUTHORIZED
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    operator: &'a str,
    pin: &'a str,
}

#[derive(Clone)]
pub struct DeviceClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl DeviceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, DeviceApiError>
    where
        T: DeserializeOwned,
    {
        let mut request = self.http.get(self.endpoint(path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;

        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(DeviceApiError::UnexpectedStatus { status, body })
        }
    }

    pub async fn system_state(&self) -> Result<SystemState, DeviceApiError> {
        self.get_json("/api/v1/system/state").await
    }

    pub async fn job_detail(&self, name: &str) -> Result<JobDetail, DeviceApiError> {
        let path = format!("/api/v1/jobs/{}", escape_path_segment(name));
        self.get_json(&path).await
    }

    pub async fn login(
        &mut self,
        operator: &str,
        pin: &str,
    ) -> Result<SessionToken, DeviceApiError> {
        let res = self
            .http
            .post(self.endpoint("/api/v1/session"))
            .json(&LoginRequest { operator, pin })
            .send()
            .await?;

        if res.status().is_success() {
            let session = res.json::<SessionToken>().await?;
            self.token = Some(session.token.clone());
            Ok(session)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(DeviceApiError::UnexpectedStatus { status, body })
        }
    }

    pub async fn logout(&mut self) -> Result<(), DeviceApiError> {
        let mut request = self.http.delete(self.endpoint("/api/v1/session"));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;
        self.token = None;

        if res.status().is_success() {
            Ok(())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(DeviceApiError::UnexpectedStatus { status, body })
        }
    }
}

/// Job names come from operators; percent-escape anything that would
/// change the path structure.
fn escape_path_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                escaped.push(byte as char);
            }
            other => {
                escaped.push('%');
                escaped.push_str(&format!("{other:02X}"));
            }
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_its_trailing_slash() {
        let client = DeviceClient::new("http://192.168.42.1:8080/");
        assert_eq!(
            client.endpoint("/api/v1/system/state"),
            "http://192.168.42.1:8080/api/v1/system/state"
        );
    }

    #[test]
    fn job_names_are_escaped_into_a_single_path_segment() {
        assert_eq!(escape_path_segment("yard-07"), "yard-07");
        assert_eq!(escape_path_segment("north lot/2"), "north%20lot%2F2");
    }

    #[test]
    fn unauthorized_is_distinguished_from_other_statuses() {
        let unauthorized = DeviceApiError::UnexpectedStatus {
            status: reqwest::StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        let server_error = DeviceApiError::UnexpectedStatus {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        assert!(unauthorized.is_unauthorized());
        assert!(!server_error.is_unauthorized());
    }

    #[test]
    fn session_token_decodes_without_expiry() {
        let session: SessionToken =
            serde_json::from_str(r#"{"token": "abc123"}"#).expect("decode");
        assert_eq!(session.token, "abc123");
        assert!(session.expires_at.is_none());
    }
}
