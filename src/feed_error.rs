use crate::graph::NodeId;
use alloy_transport::{RpcError, TransportErrorKind};
use eyre::Report;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    // Node construction
    #[error("resolution failed: {0}")]
    Resolution(String),
    #[error("parent node {0} does not exist")]
    MissingParent(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    // Runtime
    #[error("provider error: {0}")]
    ProviderTransient(String),
    #[error("decode error: {0}")]
    Decode(String),

    // Startup
    #[error("service already started")]
    AlreadyStarted,
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Errors that only abandon the in-flight operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderTransient(_) | Self::Decode(_))
    }
}

impl From<RpcError<TransportErrorKind>> for FeedError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        Self::ProviderTransient(error.to_string())
    }
}

impl From<alloy_sol_types::Error> for FeedError {
    fn from(error: alloy_sol_types::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<Report> for FeedError {
    fn from(error: Report) -> Self {
        Self::ProviderTransient(error.to_string())
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
