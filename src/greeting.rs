//! Outbound greeting client.
//!
//! The greeting endpoint only depends on [`GreetingService`]; production wires
//! in [`HttpGreetingService`], tests are free to pass any other implementation.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

/// Path of the greeting operation, relative to the service base URL.
pub const HELLO_EXT_PATH: &str = "helloext";

#[derive(Debug, Error)]
pub enum GreetingClientError {
    #[error("greeting request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("greeting service at {url} answered with status {status}")]
    Status { status: StatusCode, url: Url },
    #[error("invalid greeting service URL: {0}")]
    Url(String),
}

#[async_trait]
pub trait GreetingService: Send + Sync {
    /// `GET /helloext`, returns the plain-text body.
    async fn hello(&self) -> Result<String, GreetingClientError>;
}

#[derive(Clone)]
pub struct HttpGreetingService {
    client: Client,
    base_url: Url,
}

impl HttpGreetingService {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl GreetingService for HttpGreetingService {
    async fn hello(&self) -> Result<String, GreetingClientError> {
        let url = self
            .base_url
            .join(HELLO_EXT_PATH)
            .map_err(|err| GreetingClientError::Url(err.to_string()))?;
        debug!(%url, "calling greeting service");

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/plain"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GreetingClientError::Status { status, url });
        }

        Ok(response.text().await?)
    }
}
