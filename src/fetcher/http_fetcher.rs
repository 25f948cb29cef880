use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;

use crate::app::Result;
use crate::config::ServerConfig;
use crate::domain::Feed;
use crate::fetcher::{FeedFetcher, ImageFetcher, NetworkError};
use crate::normalizer::Normalizer;

const FEED_ACCEPT: &str = "application/atom+xml, application/xml;q=0.9, */*;q=0.8";

pub struct HttpFetcher {
    client: Client,
    normalizer: Normalizer,
}

impl HttpFetcher {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            normalizer: Normalizer::new(),
        })
    }

    async fn get_bytes(&self, url: &str, accept: Option<&'static str>) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, HeaderValue::from_static(accept));
        }

        let response = request.send().await.map_err(NetworkError::from)?;
        let response = response.error_for_status().map_err(NetworkError::from)?;
        let body = response.bytes().await.map_err(NetworkError::from)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_feed(&self, url: &str) -> Result<Feed> {
        let body = self.get_bytes(url, Some(FEED_ACCEPT)).await?;
        tracing::debug!("Fetched {} bytes of feed from {}", body.len(), url);
        self.normalizer.normalize(&body)
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url, None).await
    }
}
