//! REST client for the attendance backend: roster, photos and events.

use attend_core::{EmployeeId, EmployeeRef, EventKind, PhotoError, PhotoSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },
}

/// Body of `POST /api/events`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub employee_id: EmployeeId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<i64>,
}

#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL for a photo reference; relative references hang off the backend.
    pub fn resolve(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            reference.to_string()
        } else {
            format!("{}/{}", self.base_url, reference.trim_start_matches('/'))
        }
    }

    pub async fn fetch_roster(&self) -> Result<Vec<EmployeeRef>, BackendError> {
        let url = format!("{}/api/employees", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let employees: Vec<EmployeeRef> = response.json().await?;
        tracing::debug!(count = employees.len(), "fetched employee roster");
        Ok(employees)
    }

    pub async fn send_event(&self, event: &EventPayload) -> Result<(), BackendError> {
        let url = format!("{}/api/events", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(EVENT_TIMEOUT)
            .json(event)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

impl PhotoSource for BackendClient {
    async fn fetch_photo(&self, reference: &str) -> Result<Vec<u8>, PhotoError> {
        let url = self.resolve(reference);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PhotoError::Fetch(e.to_string()))?;
        match response.status() {
            s if s.is_success() => {}
            s if s == reqwest::StatusCode::NOT_FOUND => return Err(PhotoError::NotFound(url)),
            s => return Err(PhotoError::Fetch(format!("HTTP {} for {url}", s.as_u16()))),
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| PhotoError::Fetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}
