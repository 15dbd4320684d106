// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wire Models
//!
//! Request and response bodies exchanged with a signing-request server.
//!
//! | Step | Method | Request body | Response |
//! |------|--------|--------------|----------|
//! | describe | `GET` | none | [`RequestDescriptor`] |
//! | fetch payload | `POST` | [`AccountRequest`] | [`SignPayload`] |
//! | complete | `PUT` | [`CompletionReceipt`] | status code only |

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::account::SelectedAccount;
use crate::signer::MessageSignature;

/// Standard alphabet, padding optional, non-canonical trailing bits accepted.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// =============================================================================
// GET
// =============================================================================

/// Display metadata of the requesting application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    pub label: String,
    pub icon: String,
}

// =============================================================================
// POST
// =============================================================================

/// Body of the POST step: the account that will sign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRequest {
    /// Base58 public key.
    pub account: String,
}

impl AccountRequest {
    pub fn for_account(account: &SelectedAccount) -> Self {
        Self {
            account: account.to_base58(),
        }
    }
}

/// The message to sign, as issued by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignPayload {
    /// Base64 of the bytes to sign.
    pub data: String,
    /// Opaque token echoed back verbatim on completion.
    pub state: String,
    /// Optional text shown next to the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SignPayload {
    /// Decode `data` into the bytes handed to the signer.
    ///
    /// Servers disagree on base64 flavour, so padding is optional, the
    /// URL-safe `-` and `_` are read as `+` and `/`, and ASCII whitespace
    /// anywhere in the string is ignored.
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let normalized: String = self
            .data
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();
        LENIENT_BASE64.decode(normalized)
    }
}

// =============================================================================
// PUT
// =============================================================================

/// Body of the PUT step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CompletionReceipt {
    /// Base58 public key of the signing account.
    pub account: String,
    /// `data` exactly as received from the POST step.
    pub data: String,
    /// `state` exactly as received from the POST step.
    pub state: String,
    /// Base64 of the raw signature bytes.
    pub signature: String,
}

impl CompletionReceipt {
    pub fn new(
        account: &SelectedAccount,
        payload: &SignPayload,
        signature: &MessageSignature,
    ) -> Self {
        Self {
            account: account.to_base58(),
            data: payload.data.clone(),
            state: payload.state.clone(),
            signature: signature.to_base64(),
        }
    }
}
