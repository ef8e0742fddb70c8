use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::HttpError;

/// A domain validation problem reported by a mutation's `userErrors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    /// Path to the offending input field, if the API reported one.
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(path) if !path.is_empty() => write!(f, "{}: {}", path.join("."), self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Errors produced while running a sync tick or an update batch.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(#[from] HttpError),

    /// The remote API answered with a non-2xx status.
    #[error("Remote request failed ({status}): {body}")]
    RemoteRequest { status: u16, body: String },

    /// A GraphQL response carried errors unrelated to query cost.
    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    /// The GraphQL query would have exceeded the cost budget and was not executed.
    #[error("Query cost {actual_cost} exceeds available budget {max_cost}")]
    CostExceeded { actual_cost: u32, max_cost: u32 },

    /// Cost-exceeded recovery kept failing past the configured bound.
    #[error("Query cost still exceeded after {attempts} attempts (batch size {batch_size})")]
    CostRetriesExhausted { attempts: u32, batch_size: usize },

    /// The remote API accepted a mutation but rejected its input.
    #[error("Remote rejected input: {}", join_user_errors(.errors))]
    RemoteUser { errors: Vec<UserError> },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A continuation token could not be decoded.
    #[error("Invalid continuation: {message}")]
    InvalidContinuation { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn join_user_errors(errors: &[UserError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    #[inline]
    pub fn remote_request(status: u16, body: impl Into<String>) -> Self {
        Self::RemoteRequest {
            status,
            body: body.into(),
        }
    }

    #[inline]
    pub fn graphql(message: impl Into<String>) -> Self {
        Self::GraphQl {
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_continuation(message: impl Into<String>) -> Self {
        Self::InvalidContinuation {
            message: message.into(),
        }
    }

    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for the budget overrun the engine recovers from on its own.
    #[inline]
    pub fn is_cost_exceeded(&self) -> bool {
        matches!(self, Self::CostExceeded { .. })
    }

    /// True for transport and HTTP-level failures of a REST or GraphQL call.
    ///
    /// The continuation handed to the failing tick stays valid, so the caller
    /// may run that tick again.
    #[inline]
    pub fn is_remote_request(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RemoteRequest { .. } | Self::GraphQl { .. }
        )
    }
}

/// First line of an error's display text.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

pub type Result<T> = std::result::Result<T, SyncError>;
