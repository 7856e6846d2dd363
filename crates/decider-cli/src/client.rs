//! HTTP client for the execution backend.

use async_trait::async_trait;
use decider_core::ports::ExecutionBackend;
use decider_core::task::TaskDefinition;
use decider_core::{CacheKey, Error, JobId, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct JobResponse {
    job_id: JobId,
}

/// [`ExecutionBackend`] talking to the backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
    index_prefix: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>, index_prefix: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            index_prefix: index_prefix.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let mut req = self.client.request(method, &url);

        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        req.send().await.map_err(|e| Error::Network(e.to_string()))
    }
}

fn status_error(what: &str, status: StatusCode) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Backend(format!("{}: not authorized ({})", what, status))
        }
        _ => Error::Backend(format!("{}: {}", what, status)),
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn submit(&self, task: &TaskDefinition) -> Result<JobId> {
        let res = self.send(self.request(Method::POST, "/jobs").json(task)).await?;

        match res.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let body: JobResponse = res.json().await.map_err(|e| Error::Network(e.to_string()))?;
                debug!(job = %task.logical_name, id = %body.job_id, "backend accepted job");
                Ok(body.job_id)
            }
            status => Err(status_error(&format!("submitting {}", task.logical_name), status)),
        }
    }

    async fn find_completed(&self, cache_key: &CacheKey) -> Result<Option<JobId>> {
        let path = format!("/index/{}.{}", self.index_prefix, cache_key);
        let res = self.send(self.request(Method::GET, &path)).await?;

        match res.status() {
            StatusCode::OK => {
                let body: JobResponse = res.json().await.map_err(|e| Error::Network(e.to_string()))?;
                Ok(Some(body.job_id))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(status_error(&format!("looking up {}", cache_key), status)),
        }
    }

    async fn fetch_artifact(&self, job_id: &JobId, path: &str) -> Result<Vec<u8>> {
        let url = format!("/jobs/{}/artifacts/{}", job_id, path);
        let res = self.send(self.request(Method::GET, &url)).await?;

        match res.status() {
            StatusCode::OK => {
                let bytes = res.bytes().await.map_err(|e| Error::Network(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(Error::ArtifactNotFound {
                job_id: job_id.to_string(),
                path: path.to_string(),
            }),
            status => Err(status_error(&format!("fetching {}", path), status)),
        }
    }
}
