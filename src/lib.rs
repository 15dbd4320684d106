// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing Request Wallet - `solana:` message signing requests
//!
//! This crate resolves a `solana:<percent-encoded url>` link (from a QR code
//! or deep link), fetches the signing request from the server it points at,
//! has the connected wallet sign the message and reports the signature back.
//!
//! ## Modules
//!
//! - `locator` - `solana:` link parsing
//! - `client` - GET / POST / PUT against the request server (reqwest)
//! - `flow` - dependency-tracked state machine for one request
//! - `session` - tokio task driving a flow with real collaborators
//! - `account` - authorized wallet accounts and the current selection
//! - `signer` - wallet signing capability
//! - `config` / `telemetry` - environment configuration and tracing setup

pub mod account;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod locator;
pub mod models;
pub mod session;
pub mod signer;
pub mod telemetry;

pub use account::{AccountAuthorization, AccountError, SelectedAccount};
pub use client::{ClientError, CompletionStatus, SigningRequestClient};
pub use config::{ClientConfig, StalePayloadPolicy};
pub use error::{FlowError, NetworkStep};
pub use flow::{FlowSnapshot, FlowStage, SigningFlow};
pub use locator::{LocatorError, SigningRequestUrl};
pub use models::{CompletionReceipt, RequestDescriptor, SignPayload};
pub use session::SigningSession;
pub use signer::{KeypairSigner, MessageSignature, MessageSigner, SignerError};
