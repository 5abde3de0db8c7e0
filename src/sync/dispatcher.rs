//! Delivery of queued operations to the remote REST API.
//!
//! Each entity is a resource collection under `/api`:
//! - create: `POST /api/{entity}` with the payload as JSON body
//! - update: `PUT /api/{entity}/{payload.id}` with the payload as JSON body
//! - delete: `DELETE /api/{entity}/{payload.id}`
//!
//! Any 2xx status is success; everything else is a [`DispatchError`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiConfig;
use crate::models::{Operation, OperationKind};

/// Why a dispatch attempt failed. All variants are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    #[error("{0}")]
    Transport(String),

    #[error("payload has no usable \"id\" field")]
    MissingResourceId,
}

/// Sends a single operation to the remote endpoint.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, op: &Operation) -> Result<(), DispatchError>;
}

/// Errors building an [`HttpDispatcher`].
#[derive(Error, Debug)]
pub enum HttpDispatcherError {
    #[error("API base URL not configured. Add api.base_url to config or set FIELDSYNC_API_URL.")]
    NotConfigured,

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`Dispatcher`] speaking JSON over HTTP via reqwest.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDispatcher {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HttpDispatcherError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, HttpDispatcherError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or(HttpDispatcherError::NotConfigured)?;
        Self::new(base_url, config.api_key.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn collection_url(&self, entity: &str) -> String {
        format!("{}/api/{}", self.base_url, urlencoding::encode(entity))
    }

    fn resource_url(&self, entity: &str, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(entity),
            urlencoding::encode(id)
        )
    }

    fn build_request(&self, op: &Operation) -> Result<reqwest::RequestBuilder, DispatchError> {
        let request = match op.kind {
            OperationKind::Create => self
                .client
                .post(self.collection_url(&op.entity))
                .json(&op.payload),
            OperationKind::Update => {
                let id = op.resource_id().ok_or(DispatchError::MissingResourceId)?;
                self.client
                    .put(self.resource_url(&op.entity, &id))
                    .json(&op.payload)
            }
            OperationKind::Delete => {
                let id = op.resource_id().ok_or(DispatchError::MissingResourceId)?;
                self.client.delete(self.resource_url(&op.entity, &id))
            }
        };

        Ok(match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, op: &Operation) -> Result<(), DispatchError> {
        let request = self.build_request(op)?;

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(id = %op.id, kind = %op.kind, entity = %op.entity, status = status.as_u16(), "dispatched");

        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
            })
        }
    }
}
