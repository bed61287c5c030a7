//! Argo CD platform client over the REST API.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use rollout_core::platform::{Application, ApplicationSource, ConvergenceEvent, ReleasePlatform};
use rollout_core::release::{HealthStatus, OperationPhase, ResourceFailure, SyncStatus};
use rollout_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// gRPC `FailedPrecondition`, returned while another operation runs.
const CODE_FAILED_PRECONDITION: i32 = 9;
const ANOTHER_OPERATION_MESSAGE: &str = "another operation is already in progress";

/// Argo CD connection settings.
#[derive(Clone, Default)]
pub struct ArgoCdConfig {
    /// Server host, optionally with a scheme.
    pub host: String,
    /// Bearer token.
    pub token: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Talk plain HTTP.
    pub plaintext: bool,
}

impl std::fmt::Debug for ArgoCdConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgoCdConfig")
            .field("host", &self.host)
            .field("token", &"[REDACTED]")
            .field("insecure", &self.insecure)
            .field("plaintext", &self.plaintext)
            .finish()
    }
}

impl ArgoCdConfig {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Base URL with a scheme and no trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else if self.plaintext {
            format!("http://{}", host)
        } else {
            format!("https://{}", host)
        }
    }
}

/// Argo CD client.
pub struct ArgoCdClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ArgoCdClient {
    pub fn new(config: ArgoCdConfig) -> Result<Self> {
        if config.host.is_empty() {
            return Err(Error::InvalidInput("argocd host is required".to_string()));
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| Error::Platform(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            token: config.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Platform(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status, &text, what));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Platform(format!("failed to decode {}: {}", what, e)))
    }
}

#[async_trait]
impl ReleasePlatform for ArgoCdClient {
    fn name(&self) -> &'static str {
        "argocd"
    }

    async fn list_applications(&self, selector: &str) -> Result<Vec<Application>> {
        let list: ApplicationList = self
            .get_json(
                "/api/v1/applications",
                &[("selector", selector), ("refresh", "normal")],
                "application list",
            )
            .await?;

        Ok(list
            .items
            .unwrap_or_default()
            .into_iter()
            .map(ArgoApplication::into_application)
            .collect())
    }

    async fn get_application(&self, name: &str, refresh: bool) -> Result<Application> {
        let path = format!("/api/v1/applications/{}", urlencoding::encode(name));
        let query: &[(&str, &str)] = if refresh {
            &[("refresh", "normal")]
        } else {
            &[]
        };

        let app: ArgoApplication = self.get_json(&path, query, name).await?;
        Ok(app.into_application())
    }

    async fn sync(&self, name: &str, revision: &str) -> Result<()> {
        let path = format!("/api/v1/applications/{}/sync", urlencoding::encode(name));
        let body = SyncRequest {
            name: name.to_string(),
            revision: revision.to_string(),
            prune: false,
        };

        let response = self
            .client
            .post(self.url(&path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Platform(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status, &text, name));
        }

        debug!(application = %name, revision = %revision, "sync triggered");
        Ok(())
    }

    async fn watch(
        &self,
        name: &str,
        revision: &str,
    ) -> Result<BoxStream<'static, ConvergenceEvent>> {
        let response = self
            .client
            .get(self.url("/api/v1/stream/applications"))
            .bearer_auth(&self.token)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| Error::Platform(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status, &text, name));
        }

        debug!(application = %name, revision = %revision, "watching application");

        let state = FeedState {
            body: response.bytes_stream().boxed(),
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures::stream::unfold(state, next_event).boxed())
    }
}

/// Map an error response to the rollout taxonomy.
fn api_error(status: StatusCode, body: &str, what: &str) -> Error {
    let parsed: ApiError = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        if parsed.error.is_empty() {
            body.trim().to_string()
        } else {
            parsed.error
        }
    } else {
        parsed.message
    };

    if parsed.code == CODE_FAILED_PRECONDITION || message.contains(ANOTHER_OPERATION_MESSAGE) {
        return Error::AnotherSyncInProgress(message);
    }

    if status == StatusCode::NOT_FOUND {
        return Error::NotFound(what.to_string());
    }

    Error::Platform(format!("{} ({}): {}", what, status, message))
}

struct FeedState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: LineDecoder,
    pending: VecDeque<ConvergenceEvent>,
    done: bool,
}

async fn next_event(mut state: FeedState) -> Option<(ConvergenceEvent, FeedState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((event, state));
        }
        if state.done {
            return None;
        }

        match state.body.next().await {
            Some(Ok(chunk)) => {
                for line in state.decoder.push(&chunk) {
                    state.pending.extend(parse_event_line(&line));
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "convergence feed broke");
                state.done = true;
            }
            None => {
                if let Some(line) = state.decoder.finish() {
                    state.pending.extend(parse_event_line(&line));
                }
                state.done = true;
            }
        }
    }
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    /// Feed a chunk, returning every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]);
            let text = text.trim_end_matches('\r');
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buf.split();
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Decode one feed line. Blank lines, SSE comments and error frames yield
/// nothing.
pub fn parse_event_line(line: &str) -> Option<ConvergenceEvent> {
    let line = line.trim();
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload.is_empty() || payload.starts_with(':') {
        return None;
    }

    let frame: StreamFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "skipping undecodable feed line");
            return None;
        }
    };

    if let Some(err) = frame.error {
        warn!(code = err.code, message = %err.message, "feed reported an error");
        return None;
    }

    frame
        .result
        .map(|event| event.application.status.into_event())
}

// Wire types

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i32,
}

#[derive(Debug, Serialize)]
struct SyncRequest {
    name: String,
    revision: String,
    prune: bool,
}

#[derive(Debug, Deserialize)]
struct ApplicationList {
    #[serde(default)]
    items: Option<Vec<ArgoApplication>>,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    result: Option<WatchEvent>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct WatchEvent {
    application: ArgoApplication,
}

#[derive(Debug, Deserialize)]
struct ArgoApplication {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ApplicationSpec,
    #[serde(default)]
    status: ApplicationStatus,
}

impl ArgoApplication {
    fn into_application(self) -> Application {
        let source = self.spec.source.unwrap_or_default();
        Application {
            name: self.metadata.name,
            labels: self.metadata.labels.unwrap_or_default(),
            source: ApplicationSource {
                repo_url: source.repo_url,
                path: source.path,
                target_revision: source.target_revision,
            },
            images: self.status.summary.images,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationSpec {
    source: Option<SourceSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceSpec {
    #[serde(rename = "repoURL", default)]
    repo_url: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    target_revision: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationStatus {
    #[serde(default)]
    sync: SyncInfo,
    #[serde(default)]
    health: HealthInfo,
    operation_state: Option<OperationState>,
    #[serde(default)]
    summary: Summary,
}

impl ApplicationStatus {
    fn into_event(self) -> ConvergenceEvent {
        let (operation_phase, operation_message, failed_resources) = match self.operation_state {
            Some(op) => (
                parse_phase(&op.phase),
                op.message.filter(|m| !m.is_empty()),
                op.sync_result
                    .map(|r| r.failed_resources())
                    .unwrap_or_default(),
            ),
            None => (None, None, Vec::new()),
        };

        ConvergenceEvent {
            sync_status: self.sync.status,
            health_status: self.health.status,
            health_message: self.health.message.filter(|m| !m.is_empty()),
            operation_phase,
            operation_message,
            failed_resources,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SyncInfo {
    #[serde(default)]
    status: SyncStatus,
}

#[derive(Debug, Default, Deserialize)]
struct HealthInfo {
    #[serde(default)]
    status: HealthStatus,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationState {
    #[serde(default)]
    phase: String,
    message: Option<String>,
    sync_result: Option<SyncResult>,
}

#[derive(Debug, Deserialize)]
struct SyncResult {
    #[serde(default)]
    resources: Vec<ResourceResult>,
}

impl SyncResult {
    fn failed_resources(self) -> Vec<ResourceFailure> {
        self.resources
            .into_iter()
            .filter(|r| {
                r.status == "SyncFailed" || r.hook_phase == "Failed" || r.hook_phase == "Error"
            })
            .map(|r| ResourceFailure {
                group: r.group,
                kind: r.kind,
                name: r.name,
                namespace: r.namespace,
                message: r.message,
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResourceResult {
    group: String,
    kind: String,
    name: String,
    namespace: String,
    status: String,
    hook_phase: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(default)]
    images: Vec<String>,
}

fn parse_phase(phase: &str) -> Option<OperationPhase> {
    match phase {
        "Running" => Some(OperationPhase::Running),
        "Terminating" => Some(OperationPhase::Terminating),
        "Failed" => Some(OperationPhase::Failed),
        "Error" => Some(OperationPhase::Error),
        "Succeeded" => Some(OperationPhase::Succeeded),
        _ => None,
    }
}
