// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signing Session
//!
//! Runs a [`SigningFlow`] against real collaborators: the HTTP client, the
//! wallet's account selection and the wallet signer.
//!
//! ## Strategy
//!
//! A session is a single tokio task owning the flow. It
//! 1. issues the GET as soon as it starts,
//! 2. forwards every change of the selected account into the flow,
//! 3. runs each HTTP command as its own detached task, so overlapping POSTs
//!    race exactly as the flow's stale-payload policy expects,
//! 4. runs the signer when [`SigningSession::sign`] is called, and
//! 5. publishes a [`FlowSnapshot`] after every step.
//!
//! ## Shutdown
//!
//! [`SigningSession::close`] cancels the task through a
//! `tokio_util::sync::CancellationToken`; dropping the session has the same
//! effect. Requests still in flight are detached and their results dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::account::SelectedAccount;
use crate::client::SigningRequestClient;
use crate::error::FlowError;
use crate::flow::{Command, Event, FlowSnapshot, FlowStage, SignatureBinding, SigningFlow};
use crate::signer::{MessageSignature, MessageSigner, SignerError};

/// Capacity of the user request queue.
const REQUEST_QUEUE_CAPACITY: usize = 8;

type SignReply = oneshot::Sender<Result<(), FlowError>>;

enum SessionRequest {
    Sign(SignReply),
}

enum Internal {
    Flow(Event),
    Signed {
        binding: SignatureBinding,
        result: Result<MessageSignature, SignerError>,
        reply: SignReply,
    },
}

/// Handle to a running signing session.
pub struct SigningSession {
    id: Uuid,
    requests: mpsc::Sender<SessionRequest>,
    snapshots: watch::Receiver<FlowSnapshot>,
    shutdown: CancellationToken,
}

impl SigningSession {
    /// Resolve `raw_url` and start its flow on the current tokio runtime.
    ///
    /// An invalid link still yields a session; it sits in
    /// [`FlowStage::Invalid`] and never touches the network.
    pub fn start(
        raw_url: &str,
        client: SigningRequestClient,
        accounts: watch::Receiver<Option<SelectedAccount>>,
        signer: Arc<dyn MessageSigner>,
    ) -> Self {
        let id = Uuid::new_v4();
        let config = client.config();
        let flow = SigningFlow::from_link(raw_url, config.require_https, config.stale_payloads);

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(flow.snapshot());
        let shutdown = CancellationToken::new();

        info!(session_id = %id, endpoint = ?flow.endpoint().map(|u| u.as_str()), "Signing session starting");

        let actor = SessionActor {
            flow,
            client,
            signer,
            accounts,
            internal_tx,
            internal_rx,
            requests: requests_rx,
            snapshots: snapshots_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(actor.run().instrument(info_span!("signing_session", session_id = %id)));

        Self {
            id,
            requests: requests_tx,
            snapshots: snapshots_rx,
            shutdown,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.snapshots.clone()
    }

    /// Ask the wallet to sign the current message.
    ///
    /// Resolves once the signature has been applied (the PUT then follows
    /// on its own) or with the reason it was not.
    pub async fn sign(&self) -> Result<(), FlowError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SessionRequest::Sign(reply))
            .await
            .map_err(|_| FlowError::SessionClosed)?;
        response.await.map_err(|_| FlowError::SessionClosed)?
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<FlowSnapshot, FlowError>
    where
        F: FnMut(&FlowSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| FlowError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    pub async fn wait_for_stage(&self, stage: FlowStage) -> Result<FlowSnapshot, FlowError> {
        self.wait_for(|s| s.stage == stage).await
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SigningSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct SessionActor {
    flow: SigningFlow,
    client: SigningRequestClient,
    signer: Arc<dyn MessageSigner>,
    accounts: watch::Receiver<Option<SelectedAccount>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    requests: mpsc::Receiver<SessionRequest>,
    snapshots: watch::Sender<FlowSnapshot>,
    shutdown: CancellationToken,
}

impl SessionActor {
    async fn run(mut self) {
        let mut commands = self.flow.start();
        let initial = self.accounts.borrow_and_update().clone();
        commands.extend(self.flow.handle(Event::AccountChanged(initial)));
        self.dispatch(commands);
        self.publish();

        let mut accounts_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Signing session shutting down");
                    return;
                }
                changed = self.accounts.changed(), if accounts_open => {
                    match changed {
                        Ok(()) => {
                            let account = self.accounts.borrow_and_update().clone();
                            info!(account = ?account.as_ref().map(SelectedAccount::to_base58), "Selected account changed");
                            let commands = self.flow.handle(Event::AccountChanged(account));
                            self.dispatch(commands);
                        }
                        // Provider gone: keep the last known selection.
                        Err(_) => accounts_open = false,
                    }
                }
                Some(internal) = self.internal_rx.recv() => self.apply(internal),
                request = self.requests.recv() => match request {
                    Some(SessionRequest::Sign(reply)) => self.begin_sign(reply),
                    None => {
                        info!("Signing session handle dropped");
                        return;
                    }
                },
            }
            self.publish();
        }
    }

    fn apply(&mut self, internal: Internal) {
        match internal {
            Internal::Flow(event) => {
                let commands = self.flow.handle(event);
                self.dispatch(commands);
            }
            Internal::Signed {
                binding,
                result,
                reply,
            } => {
                let outcome = match &result {
                    Ok(_) => Ok(()),
                    Err(e) => Err(FlowError::SignerRejected(e.clone())),
                };
                let commands = self.flow.handle(Event::Signed { binding, result });
                let outcome = match outcome {
                    Ok(()) if self.flow.signature().is_none() => {
                        Err(FlowError::NotReady("the message changed while signing"))
                    }
                    other => other,
                };
                self.dispatch(commands);
                let _ = reply.send(outcome);
            }
        }
    }

    fn begin_sign(&mut self, reply: SignReply) {
        let request = match self.flow.begin_signing() {
            Ok(request) => request,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let signer = Arc::clone(&self.signer);
        let tx = self.internal_tx.clone();
        tokio::spawn(
            async move {
                let result = if signer.is_available().await {
                    signer
                        .sign_message(&request.message, &request.binding.account)
                        .await
                } else {
                    Err(SignerError::Unavailable("wallet is not reachable".to_string()))
                };
                let _ = tx.send(Internal::Signed {
                    binding: request.binding,
                    result,
                    reply,
                });
            }
            .in_current_span(),
        );
    }

    fn dispatch(&self, commands: Vec<Command>) {
        for command in commands {
            let client = self.client.clone();
            let tx = self.internal_tx.clone();
            tokio::spawn(
                async move {
                    let event = match command {
                        Command::FetchDescriptor { endpoint } => {
                            Event::DescriptorFetched(client.fetch_descriptor(&endpoint).await)
                        }
                        Command::FetchPayload { endpoint, ticket } => {
                            let result = client.fetch_payload(&endpoint, &ticket.key.account).await;
                            Event::PayloadFetched { ticket, result }
                        }
                        Command::SubmitCompletion { endpoint, ticket } => {
                            let result = client.submit_completion(&endpoint, &ticket.receipt).await;
                            Event::CompletionSubmitted { ticket, result }
                        }
                    };
                    if tx.send(Internal::Flow(event)).is_err() {
                        warn!("Session ended before a request finished; result dropped");
                    }
                }
                .in_current_span(),
            );
        }
    }

    fn publish(&self) {
        let next = self.flow.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
