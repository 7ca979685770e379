//! HTTP fetch seam for description documents.
//!
//! The tracker only needs "give me the bytes behind this URL"; putting that
//! behind a trait keeps the fetch pipeline testable with canned documents
//! and lets embedders swap the transport.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::errors::DescriptionError;

/// Fetches one description document.
#[async_trait]
pub trait DescriptionFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, DescriptionError>;
}

/// reqwest-based fetcher: per-request timeout, automatic redirects, fixed
/// User-Agent.
pub struct HttpDescriptionFetcher {
    client: reqwest::Client,
}

impl HttpDescriptionFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, DescriptionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DescriptionFetcher for HttpDescriptionFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, DescriptionError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
