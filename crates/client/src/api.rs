// crates/client/src/api.rs
//! Thin `reqwest` wrapper over the jobkeeper HTTP API.

use std::time::Duration;

use jobkeeper_core::{JobId, JobStatus};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `GET /api/active-job`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActiveJobView {
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub title: Option<String>,
}

/// `POST /api/jobs` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedJob {
    pub job_id: JobId,
    pub total_items: u64,
}

/// `GET /api/jobs/{id}` response, without results.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    #[serde(default)]
    pub title: Option<String>,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
    pub success: u64,
    pub errors: u64,
    pub percentage: f64,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusView {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Serialize)]
struct CreateJobBody<'a> {
    items: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Deserialize)]
struct ClearedBody {
    cleared: bool,
}

#[derive(Deserialize)]
struct CancelBody {
    status: JobStatus,
}

#[derive(Debug, Clone)]
pub struct JobsApi {
    client: Client,
    base_url: String,
}

impl JobsApi {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:47893`.
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn get_active_job(&self) -> ClientResult<ActiveJobView> {
        let resp = self.client.get(self.url("/active-job")).send().await?;
        decode(resp).await
    }

    /// Compare-and-clear: only clears while the pointer still names `job_id`.
    pub async fn clear_active_job_if_current(&self, job_id: JobId) -> ClientResult<bool> {
        let resp = self
            .client
            .delete(self.url("/active-job"))
            .query(&[("job_id", job_id.to_string())])
            .send()
            .await?;
        Ok(decode::<ClearedBody>(resp).await?.cleared)
    }

    pub async fn create_job(&self, items: &[String], title: Option<&str>) -> ClientResult<CreatedJob> {
        let resp = self
            .client
            .post(self.url("/jobs"))
            .json(&CreateJobBody { items, title })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn get_job_status(&self, job_id: JobId) -> ClientResult<JobStatusView> {
        let resp = self
            .client
            .get(self.url(&format!("/jobs/{job_id}")))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn cancel_job(&self, job_id: JobId) -> ClientResult<JobStatus> {
        let resp = self
            .client
            .post(self.url(&format!("/jobs/{job_id}/cancel")))
            .send()
            .await?;
        Ok(decode::<CancelBody>(resp).await?.status)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    let status = resp.status();
    if !status.is_success() {
        return Err(ClientError::Status {
            status: status.as_u16(),
        });
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
