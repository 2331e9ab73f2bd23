//! Outbound platform API client.
//!
//! reqwest-backed implementation of the `PlatformClient` port with a
//! token-bucket rate limiter in front of every request, so a burst of
//! matched rules cannot exhaust the platform's API quota.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::ApiConfig;
use crate::domain::ports::PlatformClient;

/// REST client for the source-control platform API.
pub struct RestPlatformClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    limiter: DefaultDirectRateLimiter,
}

impl RestPlatformClient {
    pub fn new(config: &ApiConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent("hookflow")
            .build()
            .map_err(|e| EngineError::Api(format!("failed to build http client: {e}")))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(per_second);
        let limiter = RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst));

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> EngineResult<Value> {
        self.limiter.until_ready().await;

        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, path, "platform api request");
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Api(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Api(format!(
                "{method} {path} returned {status}: {text}"
            )));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Api(format!("failed to read body: {e}")))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Api(format!("invalid json response: {e}")))
    }
}

#[async_trait]
impl PlatformClient for RestPlatformClient {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> EngineResult<Value> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| EngineError::Api(format!("invalid http method '{method}'")))?;
        self.send(method, path, body).await
    }

    async fn dispatch_workflow(
        &self,
        repository: &str,
        workflow: &str,
        reference: &str,
        inputs: &Value,
    ) -> EngineResult<()> {
        let path = format!("/repos/{repository}/actions/workflows/{workflow}/dispatches");
        let body = json!({ "ref": reference, "inputs": inputs });
        self.send(reqwest::Method::POST, &path, Some(&body)).await?;
        Ok(())
    }
}
