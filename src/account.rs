// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet accounts and the authorization state that selects one of them.
//!
//! A Solana account is identified by its 32-byte Ed25519 public key, shown
//! as Base58. [`AccountAuthorization`] tracks which accounts the connected
//! wallet has authorized and which one is selected, and publishes the
//! selection over a `watch` channel so signing flows can react to changes.

use std::fmt;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("account {0} is not authorized")]
    NotAuthorized(String),
}

/// An account authorized by the connected wallet.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SelectedAccount {
    public_key: [u8; 32],
    label: Option<String>,
}

impl SelectedAccount {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self {
            public_key,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Parse a Base58 address that must decode to exactly 32 bytes.
    pub fn from_base58(address: &str) -> Result<Self, AccountError> {
        let bytes = bs58::decode(address.trim())
            .into_vec()
            .map_err(|e| AccountError::InvalidPublicKey(format!("base58 decode failed: {e}")))?;

        let public_key: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            AccountError::InvalidPublicKey(format!("expected 32 bytes, got {}", v.len()))
        })?;

        Ok(Self::new(public_key))
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.public_key).into_string()
    }
}

impl fmt::Debug for SelectedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedAccount")
            .field("address", &self.to_base58())
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for SelectedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// Authorized accounts of the connected wallet plus the current selection.
///
/// The selection is `None` until a wallet connects and again after it
/// disconnects. Subscribers are only notified when the selection actually
/// changes.
pub struct AccountAuthorization {
    accounts: Vec<SelectedAccount>,
    selected: watch::Sender<Option<SelectedAccount>>,
}

impl Default for AccountAuthorization {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountAuthorization {
    pub fn new() -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            accounts: Vec::new(),
            selected,
        }
    }

    /// Record a wallet authorization.
    ///
    /// Keeps the current selection if it is still among `accounts`,
    /// otherwise selects the first account (or none if the list is empty).
    pub fn authorize(&mut self, accounts: Vec<SelectedAccount>) {
        let keep = self
            .selected
            .borrow()
            .as_ref()
            .and_then(|current| {
                accounts
                    .iter()
                    .find(|a| a.public_key == current.public_key)
                    .cloned()
            });
        let next = keep.or_else(|| accounts.first().cloned());

        info!(
            accounts = accounts.len(),
            selected = ?next.as_ref().map(SelectedAccount::to_base58),
            "Wallet authorized"
        );

        self.accounts = accounts;
        self.set_selected(next);
    }

    /// Switch the selection to another authorized account.
    pub fn select(&mut self, public_key: &[u8; 32]) -> Result<(), AccountError> {
        let account = self
            .accounts
            .iter()
            .find(|a| &a.public_key == public_key)
            .cloned()
            .ok_or_else(|| AccountError::NotAuthorized(bs58::encode(public_key).into_string()))?;

        let label = account.to_string();
        if self.set_selected(Some(account)) {
            info!(account = %label, "Selected account changed");
        }
        Ok(())
    }

    /// Forget all accounts, as on wallet disconnect.
    pub fn deauthorize(&mut self) {
        info!("Wallet deauthorized");
        self.accounts.clear();
        self.set_selected(None);
    }

    pub fn accounts(&self) -> &[SelectedAccount] {
        &self.accounts
    }

    pub fn current(&self) -> Option<SelectedAccount> {
        self.selected.borrow().clone()
    }

    /// Receiver that observes every change of the selected account.
    pub fn subscribe(&self) -> watch::Receiver<Option<SelectedAccount>> {
        self.selected.subscribe()
    }

    /// Returns whether the selection actually changed.
    fn set_selected(&self, next: Option<SelectedAccount>) -> bool {
        self.selected.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}
