//! Error types for tailnet-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error (from status client initialization)
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

/// Errors surfaced by a membership source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be contacted (connect, timeout, non-2xx status).
    #[error("membership source unreachable: {0}")]
    Unreachable(String),

    /// The source answered with something we could not parse.
    #[error("malformed membership data: {0}")]
    Decode(String),

    /// A watch stream ended without an error.
    #[error("membership stream ended")]
    StreamEnded,
}

impl SourceError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SourceError::Unreachable(_) => "unreachable",
            SourceError::Decode(_) => "decode",
            SourceError::StreamEnded => "stream_ended",
        }
    }
}
