//! Egress error types

use thiserror::Error;

/// Errors raised while acquiring or validating a network egress
#[derive(Error, Debug)]
pub enum EgressError {
    #[error("Control channel failure: {0}")]
    ControlChannel(String),

    #[error("Identity probe failed: {0}")]
    ProbeFailed(String),

    #[error("Proxy list fetch failed: {0}")]
    ListFetch(String),

    #[error("Proxy list is empty")]
    EmptyList,

    #[error("No valid proxy left in the candidate pool")]
    NoValidProxy,

    #[error("Invalid proxy endpoint: {0}")]
    InvalidEndpoint(String),
}
