//! services/scanner/src/adapters/http.rs
//!
//! HTTP transport to the server of record: the `IngestionGateway` used by the
//! sync coordinator and the scan path, and the `/api/health` reachability probe.
//!
//! Anything that prevents a definite answer (connection refused, timeout, 5xx,
//! unreadable body) is `PortError::Transport`, which the engine treats as
//! retryable. A definite refusal is `PortError::Rejected` or a
//! `MarkDisposition::Rejected`.

use std::time::Duration;

use async_trait::async_trait;
use attendance_core::domain::{AttendanceClaim, QrToken, TokenPayload};
use attendance_core::ports::{
    ConnectivityProbe, IngestionGateway, MarkDisposition, PortError, PortResult,
};
use attendance_core::wire::{
    AttendanceLog, BatchOutcome, DecodeTokenRequest, DecodeTokenResponse, ErrorBody, ErrorCode,
    MarkRequest, MarkResponse, SyncRequest, SyncResponse,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

const USER_AGENT: &str = concat!("attendance-scanner/", env!("CARGO_PKG_VERSION"));

//=========================================================================================
// Ingestion Client
//=========================================================================================

#[derive(Clone)]
pub struct HttpIngestionClient {
    http_client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpIngestionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> PortResult<(StatusCode, String)> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        Ok((status, text))
    }
}

fn transport(e: reqwest::Error) -> PortError {
    PortError::Transport(e.to_string())
}

fn parse<T: DeserializeOwned>(body: &str) -> PortResult<T> {
    serde_json::from_str(body)
        .map_err(|e| PortError::Transport(format!("Unreadable response body: {}", e)))
}

/// The `{ error, code }` body, if the server sent one.
fn error_body(body: &str) -> Option<ErrorBody> {
    serde_json::from_str(body).ok()
}

/// Shared handling for statuses that mean the same thing on every endpoint.
fn common_failure(status: StatusCode, body: &str) -> PortError {
    let message = error_body(body)
        .map(|b| b.error)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        PortError::Unauthorized
    } else if status.is_client_error() {
        PortError::Rejected(message)
    } else {
        PortError::Transport(message)
    }
}

fn batch_result(status: StatusCode, body: &str) -> PortResult<BatchOutcome> {
    if status.is_success() {
        Ok(parse::<SyncResponse>(body)?.results)
    } else {
        Err(common_failure(status, body))
    }
}

fn mark_result(status: StatusCode, body: &str) -> PortResult<MarkDisposition> {
    if status.is_success() {
        return Ok(MarkDisposition::Confirmed(parse::<MarkResponse>(body)?.attendance));
    }
    match (status, error_body(body)) {
        (StatusCode::BAD_REQUEST, Some(b)) if b.code == ErrorCode::Duplicate => {
            Ok(MarkDisposition::Duplicate)
        }
        (StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND, Some(b)) => {
            Ok(MarkDisposition::Rejected(b.error))
        }
        _ => Err(common_failure(status, body)),
    }
}

fn decode_result(status: StatusCode, body: &str) -> PortResult<TokenPayload> {
    if status.is_success() {
        Ok(parse::<DecodeTokenResponse>(body)?.data)
    } else {
        Err(common_failure(status, body))
    }
}

#[async_trait]
impl IngestionGateway for HttpIngestionClient {
    async fn submit_batch(&self, logs: &[AttendanceLog]) -> PortResult<BatchOutcome> {
        let request = SyncRequest {
            logs: logs.to_vec(),
        };
        let (status, body) = self.post("/api/attendance/sync", &request).await?;
        batch_result(status, &body)
    }

    async fn mark_single(&self, claim: &AttendanceClaim) -> PortResult<MarkDisposition> {
        let (status, body) = self
            .post("/api/attendance/mark", &MarkRequest::from(claim))
            .await?;
        mark_result(status, &body)
    }

    async fn decode_token(&self, token: &QrToken) -> PortResult<TokenPayload> {
        let request = DecodeTokenRequest {
            encrypted: Some(token.data.clone()),
            iv: Some(token.iv.clone()),
        };
        let (status, body) = self.post("/api/qr/decode", &request).await?;
        decode_result(status, &body)
    }
}

//=========================================================================================
// Reachability Probe
//=========================================================================================

/// Considers the server reachable when `/api/health` answers with a success status.
pub struct HttpProbe {
    http_client: reqwest::Client,
    health_url: String,
}

impl HttpProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http_client,
            health_url: format!("{}/api/health", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.http_client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}
