#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Model-assisted reasoning plumbing shared by the decision and reflection phases.
//!
//! A [`ReasoningService`] turns a prompt into free text; [`extract`] pulls structured JSON out
//! of that text even when the model wraps it in prose; a [`StrategyChain`] runs the model path
//! first and falls back to deterministic strategies in order.

/// Reasoning service trait and the HTTP client.
pub mod client;
/// Tolerant JSON extraction from model output.
pub mod extract;
/// Ordered model-then-fallback strategies.
pub mod strategy;

use std::time::Duration;

use thiserror::Error;

pub use client::{HttpReasoningService, ReasoningService, ReasoningSettings};
pub use extract::{extract_json_array, extract_json_block, parse_json_list, parse_json_object};
pub use strategy::{Resolved, Strategy, StrategyChain};

/// Failures of the reasoning service itself.
#[derive(Debug, Error)]
pub enum ReasoningError {
    /// No endpoint or key configured.
    #[error("reasoning service not configured: {0}")]
    NotConfigured(String),
    /// Transport or HTTP status failure.
    #[error("reasoning request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The call exceeded its deadline.
    #[error("reasoning request timed out after {0:?}")]
    Timeout(Duration),
    /// The service answered with something that is not usable.
    #[error("reasoning response unusable: {0}")]
    Malformed(String),
}

/// Failures of one strategy in a chain.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The backing service could not be reached.
    #[error("strategy unavailable: {0}")]
    Unavailable(String),
    /// The service answered but the answer could not be parsed.
    #[error("unparseable output: {0}")]
    Unparseable(String),
    /// The strategy has nothing to say about this input.
    #[error("strategy declined: {0}")]
    Declined(String),
    /// Every strategy in the chain failed.
    #[error("all strategies failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

impl From<ReasoningError> for StrategyError {
    fn from(err: ReasoningError) -> Self {
        match err {
            ReasoningError::Malformed(detail) => Self::Unparseable(detail),
            other => Self::Unavailable(other.to_string()),
        }
    }
}
