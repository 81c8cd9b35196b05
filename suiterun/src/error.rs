//! Errors raised while talking to the build service and the reporting API.

use thiserror::Error;

/// Request kinds issued against the build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SubmitBuild,
    GetBuild,
    CancelBuild,
    FetchLog,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubmitBuild => write!(f, "starting build"),
            Self::GetBuild => write!(f, "getting build details"),
            Self::CancelBuild => write!(f, "cancelling build"),
            Self::FetchLog => write!(f, "downloading build log"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid build service URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("cannot create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{operation} failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: Operation,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an unreadable response: {reason}")]
    Decode { operation: Operation, reason: String },
}

impl ServiceError {
    /// Whether the request ran into its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid reporting API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("cannot create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("reporting request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("reporting API returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Longest response body kept in an error message.
pub(crate) const MAX_ERROR_BODY: usize = 2048;

pub(crate) fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
