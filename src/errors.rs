//! Typed error hierarchy for the tutorstream engine.
//!
//! The enums follow the boundaries of the engine:
//! - `ApiError`: anything that went wrong talking to the backend
//! - `GenerationError`: a generation turn that did not complete
//! - `LedgerError`: misuse of the conversation ledger
//! - `CompletionError`: file completion session failures
//! - `StoreError`: durable store read/write failures

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The structured body the backend returns with HTTP 403 when the caller's
/// plan does not include a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{error} (feature '{feature}' is not available on the '{current_plan}' plan)")]
pub struct FeatureAccessError {
    pub error: String,
    pub feature: String,
    pub current_plan: String,
    #[serde(default)]
    pub upgrade_message: String,
    #[serde(default)]
    pub upgrade_url: String,
}

/// Failures at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed{}: {message}", fmt_status(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error(transparent)]
    FeatureAccess(#[from] FeatureAccessError),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl ApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        ApiError::Transport {
            status: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// A generation turn that ended without a `Done` event.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The backend sent a well-formed `error` frame. Content received
    /// before it is kept in `partial`.
    #[error("Generation failed: {message}")]
    Protocol { message: String, partial: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl GenerationError {
    /// The structured plan/upgrade details, if this failure was a 403
    /// feature-access refusal.
    pub fn feature_access(&self) -> Option<&FeatureAccessError> {
        match self {
            GenerationError::Api(ApiError::FeatureAccess(e)) => Some(e),
            _ => None,
        }
    }

    /// Content that arrived before the failure, when known.
    pub fn partial(&self) -> Option<&str> {
        match self {
            GenerationError::Protocol { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.feature_access() {
            Some(e) if !e.upgrade_message.is_empty() => e.upgrade_message.clone(),
            Some(e) => e.error.clone(),
            None => "Failed to generate response".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("No provisional assistant message is open")]
    NoProvisional,

    #[error("Message {id} not found")]
    MessageNotFound { id: String },

    #[error("Message {id} is still receiving content")]
    MessageInFlight { id: String },
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("No file completion session is active")]
    NoSession,

    #[error("There is no proposed content to apply")]
    NoProposal,

    #[error("Version {index} does not exist (history has {len} entries)")]
    VersionOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl CompletionError {
    pub fn feature_access(&self) -> Option<&FeatureAccessError> {
        match self {
            CompletionError::Api(ApiError::FeatureAccess(e)) => Some(e),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            CompletionError::Api(ApiError::FeatureAccess(e)) => e.error.clone(),
            CompletionError::Api(ApiError::Transport { .. }) => "Failed to process file".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}
