use thiserror::Error;

use crate::fetcher::{NetworkError, NetworkErrorKind};
use crate::navigation::NavError;

#[derive(Error, Debug)]
pub enum OpdsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Network(#[from] NetworkError),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Navigation(#[from] NavError),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl OpdsError {
    /// Place this error in the network failure taxonomy shown to the user.
    pub fn network_kind(&self) -> NetworkErrorKind {
        match self {
            OpdsError::Http(e) => NetworkErrorKind::from(e),
            OpdsError::Network(e) => e.kind,
            OpdsError::Io(_) => NetworkErrorKind::Io,
            OpdsError::Navigation(NavError::FeedFetchFailed { kind, .. }) => *kind,
            _ => NetworkErrorKind::Unknown,
        }
    }

    /// Collapse into the kind/detail pair kept by navigation and cache state.
    pub fn into_network_error(self) -> NetworkError {
        match self {
            OpdsError::Network(e) => e,
            other => NetworkError::new(other.network_kind(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpdsError>;
