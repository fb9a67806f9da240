//! Remote API
//!
//! One remote call per `(entity, op type)` pair. [`Route::resolve`] maps a
//! queued operation onto the REST endpoint; [`HttpRemoteApi`] performs it
//! with reqwest and classifies failures into retryable and rejected.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{EntityKind, Fields, OpType, PendingOperation, ServerRecord};

/// Failure of a remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The server refused the payload; retrying will not help
    #[error("Server rejected request ({status}): {message}")]
    Validation { status: u16, message: String },

    /// Network trouble or a server-side fault; worth retrying
    #[error("Network error: {0}")]
    Transient(String),

    /// The response could not be understood
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether the operation should consume retry budget and be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::Validation { .. })
    }

    /// Classify an HTTP error status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => {
                RemoteError::Transient(format!("HTTP {}: {}", status, message))
            }
            _ => RemoteError::Validation { status, message },
        }
    }
}

/// Calls the client makes against the authoritative server
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Apply one queued operation, returning the confirmed record
    async fn execute(&self, op: &PendingOperation) -> Result<ServerRecord, RemoteError>;

    /// Fetch the full authoritative collection for an entity kind
    async fn fetch_list(&self, entity: EntityKind) -> Result<Vec<ServerRecord>, RemoteError>;
}

/// HTTP method of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// Endpoint an operation is sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    /// Map an operation to its endpoint
    ///
    /// Everything but a create needs a target id.
    pub fn resolve(op: &PendingOperation) -> Result<Self, RemoteError> {
        let collection = op.entity.plural();

        let route = match &op.op_type {
            OpType::Create => Self {
                method: Method::Post,
                path: format!("/{}", collection),
            },
            OpType::Update => Self {
                method: Method::Patch,
                path: format!("/{}/{}", collection, require_target(op)?),
            },
            OpType::Delete => Self {
                method: Method::Delete,
                path: format!("/{}/{}", collection, require_target(op)?),
            },
            OpType::Domain(action) => Self {
                method: Method::Post,
                path: format!(
                    "/{}/{}/{}",
                    collection,
                    require_target(op)?,
                    action.replace('_', "-")
                ),
            },
        };
        Ok(route)
    }

    /// Endpoint listing a whole collection
    pub fn list(entity: EntityKind) -> Self {
        Self {
            method: Method::Get,
            path: format!("/{}", entity.plural()),
        }
    }
}

fn require_target(op: &PendingOperation) -> Result<&str, RemoteError> {
    op.target_id
        .as_deref()
        .ok_or_else(|| RemoteError::Validation {
            status: 0,
            message: format!("{} {} has no target id", op.entity, op.op_type),
        })
}

/// List responses come either bare or wrapped in `data`
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody {
    Bare(Vec<ServerRecord>),
    Wrapped { data: Vec<ServerRecord> },
}

/// reqwest-backed [`RemoteApi`]
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("outpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, route: &Route) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, route.path);
        match route.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(RemoteError::from_status(status.as_u16(), error_message(&body)))
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn execute(&self, op: &PendingOperation) -> Result<ServerRecord, RemoteError> {
        let route = Route::resolve(op)?;
        debug!("{:?} {} ({})", route.method, route.path, op.short_id());

        let mut request = self.request(&route);
        if route.method != Method::Delete {
            request = request.json(&op.payload);
        }
        let body = self.send(request).await?;

        // Deletes usually answer 204 with nothing to parse
        if body.trim().is_empty() {
            let id = op.target_id.clone().ok_or_else(|| {
                RemoteError::Decode(format!("empty response to {} {}", op.entity, op.op_type))
            })?;
            return Ok(ServerRecord::new(id, Fields::new()));
        }

        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn fetch_list(&self, entity: EntityKind) -> Result<Vec<ServerRecord>, RemoteError> {
        let route = Route::list(entity);
        let body = self.send(self.request(&route)).await?;

        let list: ListBody =
            serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        match list {
            ListBody::Bare(records) | ListBody::Wrapped { data: records } => Ok(records),
        }
    }
}

/// Pull a human message out of an error body
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "error")]
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect())
}
