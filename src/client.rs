// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for signing-request servers.
//!
//! Each method performs exactly one request; sequencing and retries are
//! the business of [`crate::flow`]. GET and POST must answer 2xx with a
//! JSON body, PUT is judged by its status code alone.
//!
//! A non-2xx GET or POST is a failure even when its body happens to parse
//! as a descriptor or payload; the body is only kept for the error text.

use std::fmt;

use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::account::SelectedAccount;
use crate::config::ClientConfig;
use crate::locator::{LocatorError, SigningRequestUrl};
use crate::models::{AccountRequest, CompletionReceipt, RequestDescriptor, SignPayload};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("HTTP client could not be built: {0}")]
    Build(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("response was invalid: {0}")]
    InvalidResponse(String),
}

/// HTTP status returned by the completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionStatus(u16);

impl CompletionStatus {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SigningRequestClient {
    config: ClientConfig,
    http: Client,
}

impl SigningRequestClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve a `solana:` link under this client's HTTPS policy.
    pub fn resolve(&self, raw: &str) -> Result<SigningRequestUrl, LocatorError> {
        SigningRequestUrl::parse_with(raw, self.config.require_https)
    }

    /// GET the label and icon of the requesting application.
    pub async fn fetch_descriptor(&self, endpoint: &Url) -> Result<RequestDescriptor, ClientError> {
        debug!(endpoint = %endpoint, "GET signing request descriptor");

        let response = self
            .http
            .get(endpoint.clone())
            .send()
            .await
            .map_err(|e| ClientError::Request(format!("GET {endpoint} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Request(format!(
                "GET {endpoint} returned {status}: {body}"
            )));
        }

        let descriptor: RequestDescriptor = response.json().await.map_err(|e| {
            ClientError::InvalidResponse(format!("GET {endpoint} invalid JSON: {e}"))
        })?;

        if descriptor.label.trim().is_empty() {
            return Err(ClientError::InvalidResponse(format!(
                "GET {endpoint} returned an empty label"
            )));
        }

        info!(endpoint = %endpoint, label = %descriptor.label, "Fetched signing request descriptor");
        Ok(descriptor)
    }

    /// POST the signing account and receive the message to sign.
    pub async fn fetch_payload(
        &self,
        endpoint: &Url,
        account: &SelectedAccount,
    ) -> Result<SignPayload, ClientError> {
        debug!(endpoint = %endpoint, account = %account, "POST signing account");

        let response = self
            .http
            .post(endpoint.clone())
            .json(&AccountRequest::for_account(account))
            .send()
            .await
            .map_err(|e| ClientError::Request(format!("POST {endpoint} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Request(format!(
                "POST {endpoint} returned {status}: {body}"
            )));
        }

        let payload: SignPayload = response.json().await.map_err(|e| {
            ClientError::InvalidResponse(format!("POST {endpoint} invalid JSON: {e}"))
        })?;

        if let Err(e) = payload.decode_data() {
            return Err(ClientError::InvalidResponse(format!(
                "POST {endpoint} returned undecodable data: {e}"
            )));
        }

        info!(endpoint = %endpoint, account = %account, "Fetched sign payload");
        Ok(payload)
    }

    /// PUT the signed receipt. Any HTTP status counts as an answer.
    pub async fn submit_completion(
        &self,
        endpoint: &Url,
        receipt: &CompletionReceipt,
    ) -> Result<CompletionStatus, ClientError> {
        debug!(endpoint = %endpoint, account = %receipt.account, "PUT completion receipt");

        let response = self
            .http
            .put(endpoint.clone())
            .json(receipt)
            .send()
            .await
            .map_err(|e| ClientError::Request(format!("PUT {endpoint} failed: {e}")))?;

        let status = CompletionStatus::new(response.status().as_u16());
        info!(endpoint = %endpoint, status = %status, "Completion receipt submitted");
        Ok(status)
    }
}
