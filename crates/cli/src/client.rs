//! HTTP client for the staging endpoints and URL building for live sessions

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use kiln_controller::{AppRef, StageRequest, StageResponse};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

const API_PREFIX: &str = "/api/v1";

/// Where the API server lives and who we are
#[derive(Debug, Clone)]
pub struct Endpoint {
    api_url: String,
    ws_url: String,
    user: String,
    password: String,
}

impl Endpoint {
    pub fn new(api_url: &str, ws_url: Option<&str>, user: &str, password: &str) -> Result<Self> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_url = match ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => websocket_url(&api_url)?,
        };
        Ok(Self {
            api_url,
            ws_url,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// `Authorization` header value shared by HTTP and WebSocket requests
    pub fn authorization(&self) -> String {
        let credentials = format!("{}:{}", self.user, self.password);
        format!("Basic {}", STANDARD.encode(credentials))
    }

    fn api(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.api_url)
    }

    fn ws(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.ws_url)
    }
}

fn websocket_url(api_url: &str) -> Result<String> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        bail!("API URL must start with http:// or https://, got {api_url}")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    title: String,
    #[serde(default)]
    details: String,
}

pub struct ApiClient {
    client: Client,
    endpoint: Endpoint,
}

impl ApiClient {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start building `blob_uid` for `app`
    pub async fn stage(
        &self,
        app: &AppRef,
        blob_uid: &str,
        builder_image: &str,
    ) -> Result<StageResponse> {
        let url = self.endpoint.api(&format!(
            "/namespaces/{}/applications/{}/stage",
            app.namespace, app.name
        ));
        let request = StageRequest {
            app: app.clone(),
            blob_uid: blob_uid.to_string(),
            builder_image: builder_image.to_string(),
        };
        debug!(%url, %app, "Requesting stage");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.endpoint.authorization())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;
        let response = check(response).await?;
        response
            .json::<StageResponse>()
            .await
            .context("Failed to decode stage response")
    }

    /// Block until the stage finishes; errors carry the server's reason
    pub async fn staged(&self, namespace: &str, stage_id: &str) -> Result<()> {
        let url = self.endpoint.api(&format!(
            "/namespaces/{namespace}/staging/{}/complete",
            urlencoding::encode(stage_id)
        ));
        debug!(%url, "Waiting for stage");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.endpoint.authorization())
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;
        check(response).await?;
        Ok(())
    }

    pub fn exec_url(&self, app: &AppRef) -> String {
        self.endpoint.ws(&format!(
            "/namespaces/{}/applications/{}/exec",
            app.namespace, app.name
        ))
    }

    /// Application logs, or the logs of one staging run when `stage_id` is set
    pub fn logs_url(&self, app: &AppRef, stage_id: Option<&str>, follow: bool) -> String {
        let stage_id = urlencoding::encode(stage_id.unwrap_or_default());
        let path = if stage_id.is_empty() {
            format!(
                "/namespaces/{}/applications/{}/logs",
                app.namespace, app.name
            )
        } else {
            format!("/namespaces/{}/staging/{stage_id}/logs", app.namespace)
        };
        format!("{}?follow={follow}&stage_id={stage_id}", self.endpoint.ws(&path))
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

fn error_from_body(status: StatusCode, body: &str) -> anyhow::Error {
    let entry = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.errors.into_iter().next());
    match entry {
        Some(entry) if entry.details.is_empty() => anyhow!("{}: {}", status, entry.title),
        Some(entry) => anyhow!("{}: {}: {}", status, entry.title, entry.details),
        None => anyhow!("{}: {}", status, body.trim()),
    }
}
