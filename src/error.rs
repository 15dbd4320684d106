// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Errors surfaced by a signing flow.
//!
//! None of these are fatal beyond the single request lifecycle they occur
//! in. `InvalidUrl` is terminal for its flow; network and signer failures
//! leave the flow where it was, so a later event or a user retry can still
//! move it forward.

use std::fmt;

use thiserror::Error;

use crate::client::ClientError;
use crate::locator::LocatorError;
use crate::signer::SignerError;

/// The HTTP exchange a network failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkStep {
    /// `GET` of label and icon.
    Describe,
    /// `POST` of the account, answered with the payload.
    FetchPayload,
    /// `PUT` of the completion receipt.
    Complete,
}

impl fmt::Display for NetworkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NetworkStep::Describe => "GET",
            NetworkStep::FetchPayload => "POST",
            NetworkStep::Complete => "PUT",
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] LocatorError),

    #[error("{step} failed: {source}")]
    Network {
        step: NetworkStep,
        source: ClientError,
    },

    #[error("signer rejected the request: {0}")]
    SignerRejected(#[from] SignerError),

    #[error("not ready: {0}")]
    NotReady(&'static str),

    #[error("signing session closed")]
    SessionClosed,
}

impl FlowError {
    pub fn network(step: NetworkStep, source: ClientError) -> Self {
        FlowError::Network { step, source }
    }

    /// Stable identifier for UI mapping and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlowError::InvalidUrl(_) => "invalid_url",
            FlowError::Network { .. } => "network_failure",
            FlowError::SignerRejected(_) => "signer_rejected",
            FlowError::NotReady(_) => "incomplete_dependencies",
            FlowError::SessionClosed => "session_closed",
        }
    }

    /// Whether the same action may succeed if tried again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FlowError::InvalidUrl(_) | FlowError::SessionClosed)
    }
}
