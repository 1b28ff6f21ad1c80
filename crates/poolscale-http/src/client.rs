//! HTTP/JSON provisioner.
//!
//! Speaks a small protocol against a provisioning API:
//!
//! ```text
//! GET    /healthz       liveness probe
//! GET    /units         [{"id", "idle", "pending", "cores_used"}]
//! POST   /units         request one more unit (200/201/202 = accepted)
//! DELETE /units/{id}    request removal (200/202/204 = accepted)
//! GET    {workloads}    [{"name", "node"}], node pools only
//! ```
//!
//! A 401 on any request surfaces as `ProvisionError::CredentialExpired`
//! so that [`crate::Reauthenticating`] can refresh and retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Empty};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use poolscale_core::config::ProvisionerConfig;
use poolscale_core::{
    ConfigResult, PortFuture, ProvisionError, ProvisionResult, ProvisioningPort, Sample, Unit,
    UnitId, UtilizationSampler, Workload,
};

use crate::reauth::CredentialRefresh;

const USER_AGENT: &str = concat!("poolscale/", env!("CARGO_PKG_VERSION"));

/// Provisioning and sampling adapter for an HTTP/JSON backend.
pub struct HttpProvisioner {
    /// host:port of the API.
    endpoint: String,
    token_file: Option<PathBuf>,
    token: RwLock<Option<String>>,
    workloads_path: Option<String>,
    request_timeout: Duration,
}

impl HttpProvisioner {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            token_file: None,
            token: RwLock::new(None),
            workloads_path: None,
            request_timeout,
        }
    }

    /// Authenticate with the bearer token stored in `path`.
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Sample by joining `/units` with workload placements from `path`.
    pub fn with_workloads_path(mut self, path: impl Into<String>) -> Self {
        self.workloads_path = Some(path.into());
        self
    }

    pub fn from_config(config: &ProvisionerConfig) -> ConfigResult<Self> {
        let mut provisioner = Self::new(&config.endpoint, config.request_timeout()?);
        if let Some(path) = &config.token_file {
            provisioner = provisioner.with_token_file(path);
        }
        if let Some(path) = &config.workloads_path {
            provisioner = provisioner.with_workloads_path(path);
        }
        Ok(provisioner)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn bearer_token(&self) -> ProvisionResult<Option<String>> {
        let Some(path) = &self.token_file else {
            return Ok(None);
        };
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(Some(token.clone()));
        }
        let token = read_token(path).await?;
        *self.token.write().await = Some(token.clone());
        Ok(Some(token))
    }

    /// Issue one request and return its status and body.
    async fn send(&self, method: Method, path: &str) -> ProvisionResult<(StatusCode, Bytes)> {
        let token = self.bearer_token().await?;
        let request = self.send_once(method.clone(), path, token);
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ProvisionError::Unreachable(format!(
                "{method} {path} timed out after {}ms",
                self.request_timeout.as_millis()
            ))),
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        token: Option<String>,
    ) -> ProvisionResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| ProvisionError::Unreachable(format!("{}: {e}", self.endpoint)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProvisionError::Transport(format!("handshake failed: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "provisioner connection closed with error");
            }
        });

        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(path)
            .header(http::header::HOST, self.endpoint.as_str())
            .header(http::header::USER_AGENT, USER_AGENT)
            .header(http::header::ACCEPT, "application/json");
        if let Some(token) = token {
            builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProvisionError::Transport(format!("building {method} {path}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProvisionError::Transport(format!("{method} {path}: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProvisionError::Transport(format!("reading {method} {path}: {e}")))?
            .to_bytes();

        debug!(%method, path, %status, bytes = body.len(), "provisioner response");
        Ok((status, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ProvisionResult<T> {
        let (status, body) = self.send(Method::GET, path).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProvisionError::CredentialExpired);
        }
        if !status.is_success() {
            return Err(ProvisionError::Unreachable(format!("GET {path} returned {status}")));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ProvisionError::Malformed(format!("GET {path}: {e}")))
    }

    /// Issue a mutating request; `Ok(false)` when the API refuses it.
    async fn mutate(
        &self,
        method: Method,
        path: &str,
        accepted: &[StatusCode],
    ) -> ProvisionResult<bool> {
        let (status, body) = self.send(method.clone(), path).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProvisionError::CredentialExpired);
        }
        if accepted.contains(&status) {
            info!(%method, path, %status, "provisioner accepted request");
            return Ok(true);
        }
        warn!(
            %method,
            path,
            %status,
            body = %String::from_utf8_lossy(&body),
            "provisioner refused request"
        );
        Ok(false)
    }

    async fn fetch_units(&self) -> ProvisionResult<Vec<Unit>> {
        self.get_json("/units").await
    }
}

impl ProvisioningPort for HttpProvisioner {
    fn probe(&self) -> PortFuture<'_, ()> {
        Box::pin(async move {
            let (status, _) = self.send(Method::GET, "/healthz").await?;
            if status.is_success() {
                Ok(())
            } else if status == StatusCode::UNAUTHORIZED {
                Err(ProvisionError::CredentialExpired)
            } else {
                Err(ProvisionError::Unreachable(format!(
                    "health check returned {status}"
                )))
            }
        })
    }

    fn add_unit(&self) -> PortFuture<'_, bool> {
        Box::pin(async move {
            self.mutate(
                Method::POST,
                "/units",
                &[StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED],
            )
            .await
        })
    }

    fn remove_unit<'a>(&'a self, unit_id: &'a str) -> PortFuture<'a, bool> {
        Box::pin(async move {
            if unit_id.is_empty() {
                return Err(ProvisionError::Malformed(
                    "cannot remove a unit without an id".to_string(),
                ));
            }
            let path = format!("/units/{}", encode_path_segment(unit_id));
            self.mutate(
                Method::DELETE,
                &path,
                &[StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT],
            )
            .await
        })
    }

    fn list_unit_ids(&self) -> PortFuture<'_, Vec<UnitId>> {
        Box::pin(async move {
            Ok(self
                .fetch_units()
                .await?
                .into_iter()
                .map(|unit| unit.id)
                .collect())
        })
    }
}

impl UtilizationSampler for HttpProvisioner {
    fn list_units(&self) -> PortFuture<'_, Vec<Unit>> {
        Box::pin(self.fetch_units())
    }

    fn sample(&self) -> PortFuture<'_, Sample> {
        Box::pin(async move {
            let units = self.fetch_units().await?;
            let Some(path) = &self.workloads_path else {
                return Ok(Sample::from_units(units));
            };
            let workloads: Vec<Workload> = self.get_json(path).await?;
            let ids: Vec<UnitId> = units.into_iter().map(|unit| unit.id).collect();
            Ok(Sample::from_assignments(&ids, &workloads))
        })
    }
}

impl CredentialRefresh for HttpProvisioner {
    fn refresh(&self) -> PortFuture<'_, ()> {
        Box::pin(async move {
            let Some(path) = &self.token_file else {
                // Nothing to reload from.
                return Err(ProvisionError::CredentialExpired);
            };
            let token = read_token(path).await?;
            *self.token.write().await = Some(token);
            info!(path = %path.display(), "reloaded provisioner token");
            Ok(())
        })
    }
}

async fn read_token(path: &Path) -> ProvisionResult<String> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        ProvisionError::Transport(format!("reading token file {}: {e}", path.display()))
    })?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(ProvisionError::CredentialExpired);
    }
    Ok(token.to_string())
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
