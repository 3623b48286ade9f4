//! HTTP backend client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info};

use crate::error::{ErrorKind, NetherError, Result};

use super::{
    classify_error_message, parse_backend_error, Backend, GenerateRequest, GenerateResponse,
    LoadRequest,
};

/// Talks to a backend over plain HTTP JSON.
pub struct HttpBackend {
    /// Base URL without a trailing slash
    base_url: String,
    client: Client,
}

impl HttpBackend {
    /// Create a client for `base_url`. `timeout` bounds each request.
    ///
    /// # Example
    /// ```
    /// use netherworld::backend::{Backend, HttpBackend};
    ///
    /// let backend = HttpBackend::new("http://localhost:8000/", None).unwrap();
    /// assert_eq!(backend.base_url(), "http://localhost:8000");
    /// assert_eq!(backend.name(), "http");
    /// ```
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(base_url, builder.build()?))
    }

    /// Create a backend with a preconfigured HTTP client.
    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Map a transport-level failure into an [`ErrorKind`].
fn classify_reqwest_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if let Some(status) = err.status() {
        ErrorKind::HttpError(status.as_u16())
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_redirect() {
        ErrorKind::TransportError
    } else if err.is_decode() {
        ErrorKind::GenericError
    } else {
        classify_error_message(&err.to_string())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn load(&self, request: &LoadRequest) -> Result<()> {
        info!(url = %self.base_url, device = %request.device, "Requesting model load");

        let response = self
            .client
            .post(format!("{}/load", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                NetherError::ModelLoad(format!(
                    "{} (a common cause is a url without http:// or a port that is not reachable)",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NetherError::ModelLoad(format!(
                "backend answered {}: {}",
                status, body
            )));
        }

        info!("Model loaded");
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<String, ErrorKind> {
        debug!(url = %self.base_url, "Requesting generation");

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let kind = classify_reqwest_error(&e);
                error!(error = %e, kind = %kind, "Generation request failed");
                kind
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_backend_error(status.as_u16(), &body));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            let kind = classify_reqwest_error(&e);
            error!(error = %e, kind = %kind, "Could not read generation response");
            kind
        })?;

        Ok(body.into_payload())
    }

    fn name(&self) -> &str {
        "http"
    }
}
