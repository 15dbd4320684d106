// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Resolution of `solana:` signing-request links to HTTP endpoints.
//!
//! A link is the literal prefix `solana:` followed by a percent-encoded
//! HTTP(S) URL, e.g. `solana:https%3A%2F%2Fexample.com%2Fapi`. Decoding
//! follows URI-component rules: `+` stays a plus sign and every `%` must
//! introduce two hex digits.
//!
//! Beyond decoding, the endpoint must be an absolute `http` or `https` URL.
//! A relative or non-HTTP endpoint is rejected here as `InvalidUrl` instead
//! of being handed to the GET, where it could only fail and leave the
//! request loading forever.

use std::fmt;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

/// Scheme prefix every signing-request link starts with.
pub const SCHEME_PREFIX: &str = "solana:";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("link does not start with `{SCHEME_PREFIX}`")]
    MissingScheme,

    #[error("malformed percent-encoding at byte {0}")]
    MalformedEncoding(usize),

    #[error("decoded endpoint is not valid UTF-8")]
    NotUtf8,

    #[error("endpoint is not an absolute URL: {0}")]
    InvalidEndpoint(String),

    #[error("endpoint scheme `{0}` is not allowed")]
    DisallowedScheme(String),
}

/// A validated signing-request link and the endpoint it points at.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningRequestUrl {
    raw: String,
    endpoint: Url,
}

impl SigningRequestUrl {
    /// Parse a link, accepting both `http` and `https` endpoints.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        Self::parse_with(raw, false)
    }

    /// Parse a link; with `require_https` only `https` endpoints pass.
    pub fn parse_with(raw: &str, require_https: bool) -> Result<Self, LocatorError> {
        let encoded = raw
            .strip_prefix(SCHEME_PREFIX)
            .ok_or(LocatorError::MissingScheme)?;

        let decoded = decode_component(encoded)?;

        let endpoint =
            Url::parse(&decoded).map_err(|e| LocatorError::InvalidEndpoint(e.to_string()))?;

        match endpoint.scheme() {
            "https" => {}
            "http" if !require_https => {}
            other => return Err(LocatorError::DisallowedScheme(other.to_string())),
        }

        Ok(Self {
            raw: raw.to_string(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_endpoint(self) -> Url {
        self.endpoint
    }
}

impl fmt::Debug for SigningRequestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRequestUrl")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl std::str::FromStr for SigningRequestUrl {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn decode_component(encoded: &str) -> Result<String, LocatorError> {
    let bytes = encoded.as_bytes();
    for (idx, _) in encoded.match_indices('%') {
        let well_formed = bytes
            .get(idx + 1..idx + 3)
            .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
        if !well_formed {
            return Err(LocatorError::MalformedEncoding(idx + SCHEME_PREFIX.len()));
        }
    }

    percent_decode_str(encoded)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| LocatorError::NotUtf8)
}
