// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signing Flow State Machine
//!
//! One [`SigningFlow`] tracks one signing-request lifecycle:
//!
//! ```text
//! Idle -> AwaitingDescriptor -> AwaitingAccount -> AwaitingPayload
//!      -> AwaitingSignature -> AwaitingCompletion -> Complete
//! Idle -> Invalid
//! ```
//!
//! The flow performs no I/O. Inputs arrive as [`Event`]s and the flow
//! answers with the [`Command`]s (HTTP requests) that must run next. After
//! every event the flow re-evaluates its dependency tuples:
//!
//! - `(label, icon, account)`: a POST is issued each time this tuple changes
//!   while complete. `A -> none -> A` issues two POSTs; re-selecting the
//!   account already selected issues none.
//! - `(account, data, state, signature)`: a PUT is issued once per distinct
//!   complete tuple.
//!
//! In-flight requests are never cancelled. Whether a POST response that is
//! older than the newest POST still gets applied is decided by
//! [`StalePayloadPolicy`].
//!
//! A signature is bound to the `(account, data, state)` it was produced for
//! and dropped as soon as any of them changes, so a PUT never pairs a
//! signature with a payload it does not cover.
//!
//! Failures do not move the stage. A failed GET leaves the flow in
//! `AwaitingDescriptor` indefinitely; the failure itself is reported through
//! [`SigningFlow::last_error`].

use tracing::{debug, warn};
use url::Url;

use crate::account::SelectedAccount;
use crate::client::{ClientError, CompletionStatus};
use crate::config::StalePayloadPolicy;
use crate::error::{FlowError, NetworkStep};
use crate::locator::SigningRequestUrl;
use crate::models::{CompletionReceipt, RequestDescriptor, SignPayload};
use crate::signer::{MessageSignature, SignerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStage {
    Idle,
    Invalid,
    AwaitingDescriptor,
    AwaitingAccount,
    AwaitingPayload,
    AwaitingSignature,
    AwaitingCompletion,
    Complete,
}

/// Dependency tuple of the POST step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadKey {
    pub descriptor: RequestDescriptor,
    pub account: SelectedAccount,
}

/// Identifies one issued POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTicket {
    pub seq: u64,
    pub key: PayloadKey,
}

/// Identifies one issued PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionTicket {
    pub seq: u64,
    pub receipt: CompletionReceipt,
}

/// What a signature was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureBinding {
    pub account: SelectedAccount,
    pub data: String,
    pub state: String,
}

/// Work handed to the signer after [`SigningFlow::begin_signing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub binding: SignatureBinding,
    pub message: Vec<u8>,
}

/// HTTP requests the flow wants performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FetchDescriptor {
        endpoint: Url,
    },
    FetchPayload {
        endpoint: Url,
        ticket: PayloadTicket,
    },
    SubmitCompletion {
        endpoint: Url,
        ticket: CompletionTicket,
    },
}

/// Inputs to the flow.
#[derive(Debug, Clone)]
pub enum Event {
    DescriptorFetched(Result<RequestDescriptor, ClientError>),
    AccountChanged(Option<SelectedAccount>),
    PayloadFetched {
        ticket: PayloadTicket,
        result: Result<SignPayload, ClientError>,
    },
    Signed {
        binding: SignatureBinding,
        result: Result<MessageSignature, SignerError>,
    },
    CompletionSubmitted {
        ticket: CompletionTicket,
        result: Result<CompletionStatus, ClientError>,
    },
}

/// Number of requests issued per HTTP step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub get: u32,
    pub post: u32,
    pub put: u32,
}

#[derive(Debug, Clone)]
struct ActivePayload {
    payload: SignPayload,
    message: Vec<u8>,
}

#[derive(Debug, Clone)]
struct BoundSignature {
    binding: SignatureBinding,
    signature: MessageSignature,
}

/// Point-in-time view of a flow, suitable for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub stage: FlowStage,
    pub endpoint: Option<Url>,
    pub descriptor: Option<RequestDescriptor>,
    pub account: Option<SelectedAccount>,
    pub payload: Option<SignPayload>,
    pub display_message: Option<String>,
    pub can_sign: bool,
    pub signing: bool,
    pub signature: Option<MessageSignature>,
    pub completion: Option<CompletionStatus>,
    pub last_error: Option<FlowError>,
    pub requests: RequestCounts,
}

impl FlowSnapshot {
    /// Done/pending indicator: a completion status has been recorded.
    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }
}

pub struct SigningFlow {
    endpoint: Option<Url>,
    policy: StalePayloadPolicy,
    started: bool,
    descriptor: Option<RequestDescriptor>,
    account: Option<SelectedAccount>,
    payload: Option<ActivePayload>,
    signature: Option<BoundSignature>,
    signing: bool,
    completed: Option<(CompletionReceipt, CompletionStatus)>,
    observed_payload_key: Option<PayloadKey>,
    newest_payload_seq: u64,
    submitted_receipt: Option<CompletionReceipt>,
    next_completion_seq: u64,
    last_error: Option<FlowError>,
    requests: RequestCounts,
}

impl SigningFlow {
    /// Flow for an already resolved link.
    pub fn new(url: SigningRequestUrl, policy: StalePayloadPolicy) -> Self {
        Self::with_endpoint(Some(url.into_endpoint()), policy, None)
    }

    /// Flow for a raw link; an unparseable link yields an `Invalid` flow.
    pub fn from_link(raw: &str, require_https: bool, policy: StalePayloadPolicy) -> Self {
        match SigningRequestUrl::parse_with(raw, require_https) {
            Ok(url) => Self::new(url, policy),
            Err(e) => {
                warn!(error = %e, "Rejected signing request link");
                Self::with_endpoint(None, policy, Some(FlowError::InvalidUrl(e)))
            }
        }
    }

    fn with_endpoint(
        endpoint: Option<Url>,
        policy: StalePayloadPolicy,
        last_error: Option<FlowError>,
    ) -> Self {
        Self {
            endpoint,
            policy,
            started: false,
            descriptor: None,
            account: None,
            payload: None,
            signature: None,
            signing: false,
            completed: None,
            observed_payload_key: None,
            newest_payload_seq: 0,
            submitted_receipt: None,
            next_completion_seq: 0,
            last_error,
            requests: RequestCounts::default(),
        }
    }

    /// Leave `Idle` and issue the GET. Only the first call has any effect.
    pub fn start(&mut self) -> Vec<Command> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Vec::new();
        };
        if self.started {
            return Vec::new();
        }
        self.started = true;
        self.requests.get += 1;
        debug!(endpoint = %endpoint, "Signing flow started");

        let mut commands = vec![Command::FetchDescriptor { endpoint }];
        commands.extend(self.reconcile());
        commands
    }

    /// Apply an event and return the requests it makes necessary.
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        if self.endpoint.is_none() {
            return Vec::new();
        }

        match event {
            Event::DescriptorFetched(Ok(descriptor)) => {
                debug!(label = %descriptor.label, "Descriptor applied");
                self.descriptor = Some(descriptor);
                self.last_error = None;
            }
            Event::DescriptorFetched(Err(e)) => {
                warn!(error = %e, "Descriptor request failed");
                self.last_error = Some(FlowError::network(NetworkStep::Describe, e));
            }
            Event::AccountChanged(account) => {
                self.account = account;
            }
            Event::PayloadFetched { ticket, result } => self.apply_payload(ticket, result),
            Event::Signed { binding, result } => self.apply_signature(binding, result),
            Event::CompletionSubmitted { ticket, result } => match result {
                Ok(status) => {
                    debug!(status = %status, seq = ticket.seq, "Completion recorded");
                    self.completed = Some((ticket.receipt, status));
                    self.last_error = None;
                }
                Err(e) => {
                    warn!(error = %e, seq = ticket.seq, "Completion request failed");
                    self.last_error = Some(FlowError::network(NetworkStep::Complete, e));
                }
            },
        }

        self.reconcile()
    }

    /// Reserve the right to sign the current payload.
    ///
    /// Fails with `NotReady` unless [`Self::can_sign`] holds and no other
    /// signature is pending. The outcome must come back as
    /// [`Event::Signed`].
    pub fn begin_signing(&mut self) -> Result<SignRequest, FlowError> {
        if self.endpoint.is_none() {
            return Err(self
                .last_error
                .clone()
                .unwrap_or(FlowError::NotReady("invalid signing request")));
        }
        if self.signing {
            return Err(FlowError::NotReady("a signature is already pending"));
        }
        let account = self
            .account
            .clone()
            .ok_or(FlowError::NotReady("no account selected"))?;
        let active = self
            .payload
            .as_ref()
            .ok_or(FlowError::NotReady("no message to sign yet"))?;
        if !self.can_sign() {
            return Err(FlowError::NotReady("message or state token is empty"));
        }

        let request = SignRequest {
            binding: SignatureBinding {
                account,
                data: active.payload.data.clone(),
                state: active.payload.state.clone(),
            },
            message: active.message.clone(),
        };
        self.signing = true;
        Ok(request)
    }

    /// Decoded message, state token and account are all present and non-empty.
    pub fn can_sign(&self) -> bool {
        match (&self.payload, &self.account) {
            (Some(active), Some(_)) => {
                !active.message.is_empty() && !active.payload.state.is_empty()
            }
            _ => false,
        }
    }

    pub fn stage(&self) -> FlowStage {
        if self.endpoint.is_none() {
            return FlowStage::Invalid;
        }
        if !self.started {
            return FlowStage::Idle;
        }
        if self.descriptor.is_none() {
            return FlowStage::AwaitingDescriptor;
        }
        if self.account.is_none() {
            return FlowStage::AwaitingAccount;
        }
        if !self.can_sign() {
            return FlowStage::AwaitingPayload;
        }
        let Some(receipt) = self.current_receipt() else {
            return FlowStage::AwaitingSignature;
        };
        match &self.completed {
            Some((completed, _)) if *completed == receipt => FlowStage::Complete,
            _ => FlowStage::AwaitingCompletion,
        }
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn descriptor(&self) -> Option<&RequestDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn account(&self) -> Option<&SelectedAccount> {
        self.account.as_ref()
    }

    pub fn payload(&self) -> Option<&SignPayload> {
        self.payload.as_ref().map(|p| &p.payload)
    }

    /// Bytes the signer receives.
    pub fn message(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|p| p.message.as_slice())
    }

    /// The message as text, with invalid UTF-8 replaced.
    pub fn display_message(&self) -> Option<String> {
        self.message()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn signature(&self) -> Option<&MessageSignature> {
        self.signature.as_ref().map(|s| &s.signature)
    }

    /// Most recently recorded PUT status, kept even if the flow has since
    /// moved on to a new payload.
    pub fn completion(&self) -> Option<CompletionStatus> {
        self.completed.as_ref().map(|(_, status)| *status)
    }

    pub fn last_error(&self) -> Option<&FlowError> {
        self.last_error.as_ref()
    }

    pub fn requests(&self) -> RequestCounts {
        self.requests
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            stage: self.stage(),
            endpoint: self.endpoint.clone(),
            descriptor: self.descriptor.clone(),
            account: self.account.clone(),
            payload: self.payload().cloned(),
            display_message: self.display_message(),
            can_sign: self.can_sign(),
            signing: self.signing,
            signature: self.signature().cloned(),
            completion: self.completion(),
            last_error: self.last_error.clone(),
            requests: self.requests,
        }
    }

    fn apply_payload(&mut self, ticket: PayloadTicket, result: Result<SignPayload, ClientError>) {
        let stale = ticket.seq < self.newest_payload_seq;
        if stale && self.policy == StalePayloadPolicy::LatestRequestWins {
            debug!(seq = ticket.seq, newest = self.newest_payload_seq, "Dropping stale payload response");
            return;
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, seq = ticket.seq, "Payload request failed");
                self.last_error = Some(FlowError::network(NetworkStep::FetchPayload, e));
                return;
            }
        };

        let message = match payload.decode_data() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, seq = ticket.seq, "Payload data is not base64");
                self.last_error = Some(FlowError::network(
                    NetworkStep::FetchPayload,
                    ClientError::InvalidResponse(format!("undecodable data: {e}")),
                ));
                return;
            }
        };

        if stale {
            warn!(seq = ticket.seq, newest = self.newest_payload_seq, account = %ticket.key.account, "Stale payload response overwrote a newer request");
        }
        debug!(seq = ticket.seq, account = %ticket.key.account, "Payload applied");
        self.payload = Some(ActivePayload { payload, message });
        self.last_error = None;
    }

    fn apply_signature(
        &mut self,
        binding: SignatureBinding,
        result: Result<MessageSignature, SignerError>,
    ) {
        self.signing = false;
        match result {
            Ok(signature) => {
                if self.current_binding().as_ref() != Some(&binding) {
                    warn!(account = %binding.account, "Discarding signature for a superseded payload");
                    return;
                }
                debug!(account = %binding.account, "Signature applied");
                self.signature = Some(BoundSignature { binding, signature });
                self.last_error = None;
            }
            Err(e) => {
                warn!(error = %e, "Signer did not sign");
                self.last_error = Some(FlowError::SignerRejected(e));
            }
        }
    }

    fn current_binding(&self) -> Option<SignatureBinding> {
        let account = self.account.clone()?;
        let active = self.payload.as_ref()?;
        Some(SignatureBinding {
            account,
            data: active.payload.data.clone(),
            state: active.payload.state.clone(),
        })
    }

    fn current_receipt(&self) -> Option<CompletionReceipt> {
        let bound = self.signature.as_ref()?;
        let account = self.account.as_ref()?;
        let active = self.payload.as_ref()?;
        if bound.binding.account != *account
            || bound.binding.data != active.payload.data
            || bound.binding.state != active.payload.state
        {
            return None;
        }
        Some(CompletionReceipt::new(account, &active.payload, &bound.signature))
    }

    fn reconcile(&mut self) -> Vec<Command> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Vec::new();
        };
        if !self.started {
            return Vec::new();
        }
        let mut commands = Vec::new();

        // POST on every change of (label, icon, account).
        let key = match (&self.descriptor, &self.account) {
            (Some(descriptor), Some(account)) => Some(PayloadKey {
                descriptor: descriptor.clone(),
                account: account.clone(),
            }),
            _ => None,
        };
        if key != self.observed_payload_key {
            self.observed_payload_key = key.clone();
            if let Some(key) = key {
                self.newest_payload_seq += 1;
                self.requests.post += 1;
                debug!(seq = self.newest_payload_seq, account = %key.account, "Issuing payload request");
                commands.push(Command::FetchPayload {
                    endpoint: endpoint.clone(),
                    ticket: PayloadTicket {
                        seq: self.newest_payload_seq,
                        key,
                    },
                });
            }
        }

        // A signature survives a disconnect but not a different account or payload.
        if let Some(bound) = &self.signature {
            let payload_changed = self.payload.as_ref().is_none_or(|active| {
                active.payload.data != bound.binding.data
                    || active.payload.state != bound.binding.state
            });
            let account_changed = self
                .account
                .as_ref()
                .is_some_and(|account| *account != bound.binding.account);
            if payload_changed || account_changed {
                debug!("Signature no longer matches the payload; discarding");
                self.signature = None;
            }
        }

        // PUT once per distinct (account, data, state, signature).
        if let Some(receipt) = self.current_receipt() {
            if self.submitted_receipt.as_ref() != Some(&receipt) {
                self.submitted_receipt = Some(receipt.clone());
                self.next_completion_seq += 1;
                self.requests.put += 1;
                debug!(seq = self.next_completion_seq, "Issuing completion request");
                commands.push(Command::SubmitCompletion {
                    endpoint,
                    ticket: CompletionTicket {
                        seq: self.next_completion_seq,
                        receipt,
                    },
                });
            }
        }

        commands
    }
}
