// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Message signing capability.
//!
//! Private keys live in the wallet, not here. The signing flow only needs
//! [`MessageSigner`]: hand over the bytes and the account, get a signature
//! back or learn that the wallet declined. [`KeypairSigner`] is an in-process
//! Ed25519 implementation for headless wallets and tests.

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey};
use thiserror::Error;

use crate::account::SelectedAccount;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("user rejected the signing request")]
    UserRejected,

    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("signer does not hold the key for account {0}")]
    AccountMismatch(String),
}

/// Raw signature bytes as produced by the wallet.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageSignature(Vec<u8>);

impl MessageSignature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Standard (padded) base64, the encoding the completion request carries.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl From<Vec<u8>> for MessageSignature {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for MessageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageSignature")
            .field(&self.to_base64())
            .finish()
    }
}

/// A wallet able to sign arbitrary messages for one of its accounts.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// Sign `message` with the key of `account`.
    ///
    /// Interactive wallets suspend here until the user approves or declines.
    async fn sign_message(
        &self,
        message: &[u8],
        account: &SelectedAccount,
    ) -> Result<MessageSignature, SignerError>;

    /// Whether the wallet is reachable at all.
    async fn is_available(&self) -> bool {
        true
    }
}

/// Ed25519 signer backed by a key held in memory.
#[derive(Clone)]
pub struct KeypairSigner {
    key: SigningKey,
}

impl KeypairSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse the 64-byte Base58 keypair export used by Solana wallets
    /// (secret seed followed by the public key).
    pub fn from_base58_keypair(encoded: &str) -> Result<Self, SignerError> {
        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| SignerError::Unavailable(format!("invalid keypair encoding: {e}")))?;

        let keypair: [u8; 64] = bytes.try_into().map_err(|v: Vec<u8>| {
            SignerError::Unavailable(format!("expected 64 keypair bytes, got {}", v.len()))
        })?;

        let key = SigningKey::from_keypair_bytes(&keypair)
            .map_err(|e| SignerError::Unavailable(format!("inconsistent keypair: {e}")))?;

        Ok(Self { key })
    }

    /// The account this key signs for.
    pub fn account(&self) -> SelectedAccount {
        SelectedAccount::new(self.key.verifying_key().to_bytes())
    }
}

impl fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("account", &self.account().to_base58())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSigner for KeypairSigner {
    async fn sign_message(
        &self,
        message: &[u8],
        account: &SelectedAccount,
    ) -> Result<MessageSignature, SignerError> {
        if account.public_key() != self.key.verifying_key().as_bytes() {
            return Err(SignerError::AccountMismatch(account.to_base58()));
        }
        let signature = self.key.sign(message);
        Ok(MessageSignature::new(signature.to_bytes().to_vec()))
    }
}
