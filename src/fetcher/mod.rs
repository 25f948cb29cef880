pub mod http_fetcher;

use std::fmt;
use std::io::Cursor;

use async_trait::async_trait;
use image::ImageReader;

use crate::app::Result;
use crate::domain::Feed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Dns,
    Timeout,
    Io,
    Http,
    Unknown,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkErrorKind::Dns => "cannot resolve host",
            NetworkErrorKind::Timeout => "connection timed out",
            NetworkErrorKind::Io => "network error",
            NetworkErrorKind::Http => "HTTP error",
            NetworkErrorKind::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

impl From<&reqwest::Error> for NetworkErrorKind {
    fn from(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_status() {
            NetworkErrorKind::Http
        } else if err.is_connect() {
            if is_resolver_failure(err) {
                NetworkErrorKind::Dns
            } else {
                NetworkErrorKind::Io
            }
        } else if err.is_request() || err.is_body() || err.is_decode() {
            NetworkErrorKind::Io
        } else {
            NetworkErrorKind::Unknown
        }
    }
}

/// Best-effort: reqwest folds resolver failures into connect errors, so the
/// only trace left is the wording somewhere down the source chain.
fn is_resolver_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    std::iter::successors(Some(err), |e| e.source()).any(|e| {
        let message = e.to_string().to_ascii_lowercase();
        ["dns", "lookup address", "resolve"]
            .iter()
            .any(|needle| message.contains(needle))
    })
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub detail: String,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        let kind = NetworkErrorKind::from(&err);
        Self::new(kind, err.to_string())
    }
}

/// Intrinsic size of a decoded page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Width over height; `None` for degenerate images.
    pub fn aspect_ratio(&self) -> Option<f32> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(self.width as f32 / self.height as f32)
    }
}

/// Read the dimensions of an encoded image without decoding its pixels.
pub fn decode_dimensions(bytes: &[u8]) -> Result<Dimensions> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(Dimensions { width, height })
}

#[async_trait]
pub trait FeedFetcher {
    /// Fetch and parse the OPDS feed at an absolute URL.
    async fn fetch_feed(&self, url: &str) -> Result<Feed>;
}

#[async_trait]
pub trait ImageFetcher {
    /// Fetch the raw bytes of a page image at an absolute URL.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}
