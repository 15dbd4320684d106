// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end signing flows against an in-process request server.
//!
//! The server is a small axum router on `127.0.0.1:0` that records every
//! request it sees, so tests can assert on what actually went over the wire.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use url::Url;

use signing_request_wallet::{
    AccountAuthorization, ClientConfig, ClientError, FlowError, FlowStage, KeypairSigner,
    MessageSignature, MessageSigner, SelectedAccount, SignerError, SigningRequestClient,
    SigningSession, StalePayloadPolicy,
};

const WAIT: Duration = Duration::from_secs(5);

type PayloadFn = Arc<dyn Fn(&str) -> Value + Send + Sync>;

#[derive(Clone)]
struct Behavior {
    get_status: StatusCode,
    get_body: String,
    put_status: StatusCode,
    slow_account: Option<String>,
    payload_for: PayloadFn,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            get_status: StatusCode::OK,
            get_body: json!({ "label": "Demo", "icon": "https://x/i.png" }).to_string(),
            put_status: StatusCode::OK,
            slow_account: None,
            payload_for: Arc::new(|_: &str| json!({ "data": "aGVsbG8=", "state": "s1" })),
        }
    }
}

struct MockServer {
    behavior: Behavior,
    gets: AtomicUsize,
    posts: Mutex<Vec<Value>>,
    puts: Mutex<Vec<Value>>,
    endpoint: Mutex<Option<Url>>,
}

impl MockServer {
    fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    fn puts(&self) -> Vec<Value> {
        self.puts.lock().unwrap().clone()
    }

    fn endpoint(&self) -> Url {
        self.endpoint.lock().unwrap().clone().unwrap()
    }
}

async fn get_request(State(mock): State<Arc<MockServer>>) -> impl IntoResponse {
    mock.gets.fetch_add(1, Ordering::SeqCst);
    (
        mock.behavior.get_status,
        [(header::CONTENT_TYPE, "application/json")],
        mock.behavior.get_body.clone(),
    )
}

async fn post_request(State(mock): State<Arc<MockServer>>, Json(body): Json<Value>) -> Json<Value> {
    let account = body["account"].as_str().unwrap_or_default().to_string();
    mock.posts.lock().unwrap().push(body);
    if mock.behavior.slow_account.as_deref() == Some(account.as_str()) {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    Json((mock.behavior.payload_for)(&account))
}

async fn put_request(State(mock): State<Arc<MockServer>>, Json(body): Json<Value>) -> StatusCode {
    mock.puts.lock().unwrap().push(body);
    mock.behavior.put_status
}

/// Start a request server and return it with the `solana:` link pointing at it.
async fn serve(behavior: Behavior) -> (Arc<MockServer>, String) {
    let mock = Arc::new(MockServer {
        behavior,
        gets: AtomicUsize::new(0),
        posts: Mutex::new(Vec::new()),
        puts: Mutex::new(Vec::new()),
        endpoint: Mutex::new(None),
    });

    let app = Router::new()
        .route(
            "/api",
            get(get_request).post(post_request).put(put_request),
        )
        .with_state(Arc::clone(&mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let endpoint = format!("http://{addr}/api");
    *mock.endpoint.lock().unwrap() = Some(Url::parse(&endpoint).unwrap());
    let link = format!(
        "solana:{}",
        utf8_percent_encode(&endpoint, NON_ALPHANUMERIC)
    );
    (mock, link)
}

fn client(policy: StalePayloadPolicy) -> SigningRequestClient {
    SigningRequestClient::new(
        ClientConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_stale_payloads(policy),
    )
    .unwrap()
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for the signing flow")
}

/// Signer whose approval can be toggled, counting every prompt.
struct ScriptedSigner {
    key: KeypairSigner,
    approve: AtomicBool,
    prompts: AtomicUsize,
}

impl ScriptedSigner {
    fn new(seed: u8, approve: bool) -> Self {
        Self {
            key: KeypairSigner::from_seed(&[seed; 32]),
            approve: AtomicBool::new(approve),
            prompts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageSigner for ScriptedSigner {
    async fn sign_message(
        &self,
        message: &[u8],
        account: &SelectedAccount,
    ) -> Result<MessageSignature, SignerError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.approve.load(Ordering::SeqCst) {
            self.key.sign_message(message, account).await
        } else {
            Err(SignerError::UserRejected)
        }
    }
}

#[tokio::test]
async fn full_exchange_reports_completion() {
    let (mock, link) = serve(Behavior {
        put_status: StatusCode::CREATED,
        ..Behavior::default()
    })
    .await;

    let signer = Arc::new(KeypairSigner::from_seed(&[42; 32]));
    let mut auth = AccountAuthorization::new();
    auth.authorize(vec![signer.account()]);

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        signer.clone(),
    );

    let ready = within(session.wait_for_stage(FlowStage::AwaitingSignature))
        .await
        .unwrap();
    assert_eq!(ready.endpoint, Some(mock.endpoint()));
    assert_eq!(ready.descriptor.as_ref().map(|d| d.label.as_str()), Some("Demo"));
    assert_eq!(
        ready.descriptor.as_ref().map(|d| d.icon.as_str()),
        Some("https://x/i.png")
    );
    assert_eq!(ready.display_message.as_deref(), Some("hello"));
    assert!(ready.can_sign);
    assert!(!ready.is_complete());

    within(session.sign()).await.unwrap();

    let done = within(session.wait_for_stage(FlowStage::Complete))
        .await
        .unwrap();
    assert_eq!(done.completion.map(|s| s.to_string()).as_deref(), Some("201"));
    assert!(done.is_complete());
    assert!(done.last_error.is_none());

    let expected = signer
        .sign_message(b"hello", &signer.account())
        .await
        .unwrap();

    let puts = mock.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0]["account"], json!(signer.account().to_base58()));
    assert_eq!(puts[0]["data"], json!("aGVsbG8="));
    assert_eq!(puts[0]["state"], json!("s1"));
    let submitted = STANDARD
        .decode(puts[0]["signature"].as_str().unwrap())
        .unwrap();
    assert_eq!(submitted, expected.as_bytes());

    let posts = mock.posts.lock().unwrap().clone();
    assert_eq!(posts, vec![json!({ "account": signer.account().to_base58() })]);
    assert_eq!(mock.gets.load(Ordering::SeqCst), 1);
    assert_eq!(done.requests.get, 1);
    assert_eq!(done.requests.post, 1);
    assert_eq!(done.requests.put, 1);
}

#[tokio::test]
async fn failed_get_never_posts_and_stays_loading() {
    let (mock, link) = serve(Behavior {
        get_status: StatusCode::INTERNAL_SERVER_ERROR,
        get_body: "upstream down".to_string(),
        ..Behavior::default()
    })
    .await;

    let signer = Arc::new(KeypairSigner::from_seed(&[1; 32]));
    let mut auth = AccountAuthorization::new();
    auth.authorize(vec![signer.account()]);

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        signer,
    );

    let failed = within(session.wait_for(|s| s.last_error.is_some()))
        .await
        .unwrap();
    assert_eq!(failed.stage, FlowStage::AwaitingDescriptor);
    assert_eq!(
        failed.last_error.as_ref().map(FlowError::error_code),
        Some("network_failure")
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.snapshot().stage, FlowStage::AwaitingDescriptor);
    assert_eq!(mock.post_count(), 0);
    assert_eq!(mock.gets.load(Ordering::SeqCst), 1);
    assert!(matches!(
        session.sign().await,
        Err(FlowError::NotReady(_))
    ));
}

#[tokio::test]
async fn account_switches_refire_post_but_not_get() {
    let (mock, link) = serve(Behavior {
        payload_for: Arc::new(|account: &str| {
            json!({ "data": STANDARD.encode(format!("sign for {account}")), "state": format!("state-{account}") })
        }),
        ..Behavior::default()
    })
    .await;

    let accounts: Vec<SelectedAccount> = (1..=3u8)
        .map(|b| KeypairSigner::from_seed(&[b; 32]).account())
        .collect();
    let mut auth = AccountAuthorization::new();
    auth.authorize(accounts.clone());

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        Arc::new(KeypairSigner::from_seed(&[1; 32])),
    );

    let expected_state = |a: &SelectedAccount| format!("state-{}", a.to_base58());

    let first = expected_state(&accounts[0]);
    within(session.wait_for(|s| s.payload.as_ref().is_some_and(|p| p.state == first)))
        .await
        .unwrap();

    for account in [&accounts[1], &accounts[2], &accounts[0]] {
        auth.select(account.public_key()).unwrap();
        let state = expected_state(account);
        within(session.wait_for(|s| s.payload.as_ref().is_some_and(|p| p.state == state)))
            .await
            .unwrap();
    }

    // Re-selecting the current account is not a change.
    auth.select(accounts[0].public_key()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(mock.post_count(), 4);
    assert_eq!(mock.gets.load(Ordering::SeqCst), 1);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.requests.post, 4);
    assert_eq!(snapshot.account.as_ref(), Some(&accounts[0]));
}

async fn race(policy: StalePayloadPolicy) -> (String, Arc<MockServer>, SigningSession) {
    let slow = KeypairSigner::from_seed(&[1; 32]).account();
    let fast = KeypairSigner::from_seed(&[2; 32]).account();

    let (mock, link) = serve(Behavior {
        slow_account: Some(slow.to_base58()),
        payload_for: Arc::new(|account: &str| {
            json!({ "data": STANDARD.encode(account), "state": format!("state-{account}") })
        }),
        ..Behavior::default()
    })
    .await;

    let mut auth = AccountAuthorization::new();
    auth.authorize(vec![slow.clone(), fast.clone()]);

    let session = SigningSession::start(
        &link,
        client(policy),
        auth.subscribe(),
        Arc::new(KeypairSigner::from_seed(&[2; 32])),
    );

    // Switch while the slow account's POST is still being served.
    within(async {
        while mock.post_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    auth.select(fast.public_key()).unwrap();

    let fast_state = format!("state-{}", fast.to_base58());
    within(session.wait_for(|s| s.payload.as_ref().is_some_and(|p| p.state == fast_state)))
        .await
        .unwrap();

    // Let the slow response land.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(mock.post_count(), 2);

    (format!("state-{}", slow.to_base58()), mock, session)
}

#[tokio::test]
async fn overlapping_posts_race_with_last_writer_winning() {
    let (slow_state, _mock, session) = race(StalePayloadPolicy::LastWriterWins).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.payload.map(|p| p.state), Some(slow_state));
    // The selection itself is the newer account.
    assert_eq!(
        snapshot.account,
        Some(KeypairSigner::from_seed(&[2; 32]).account())
    );
}

#[tokio::test]
async fn latest_request_policy_ignores_stale_post() {
    let (slow_state, _mock, session) = race(StalePayloadPolicy::LatestRequestWins).await;
    let snapshot = session.snapshot();
    assert_ne!(snapshot.payload.map(|p| p.state), Some(slow_state));
    assert_eq!(snapshot.stage, FlowStage::AwaitingSignature);
}

#[tokio::test]
async fn signer_rejection_can_be_retried() {
    let (mock, link) = serve(Behavior::default()).await;

    let signer = Arc::new(ScriptedSigner::new(9, false));
    let mut auth = AccountAuthorization::new();
    auth.authorize(vec![signer.key.account()]);

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        signer.clone(),
    );
    within(session.wait_for_stage(FlowStage::AwaitingSignature))
        .await
        .unwrap();

    let err = within(session.sign()).await.unwrap_err();
    assert_eq!(err, FlowError::SignerRejected(SignerError::UserRejected));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.stage, FlowStage::AwaitingSignature);
    assert_eq!(
        snapshot.last_error.as_ref().map(FlowError::error_code),
        Some("signer_rejected")
    );
    assert!(mock.puts().is_empty());

    signer.approve.store(true, Ordering::SeqCst);
    within(session.sign()).await.unwrap();
    within(session.wait_for_stage(FlowStage::Complete))
        .await
        .unwrap();
    assert_eq!(signer.prompts.load(Ordering::SeqCst), 2);
    assert_eq!(mock.puts().len(), 1);
}

#[tokio::test]
async fn server_error_on_put_is_recorded_verbatim() {
    let (mock, link) = serve(Behavior {
        put_status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Behavior::default()
    })
    .await;

    let signer = Arc::new(KeypairSigner::from_seed(&[5; 32]));
    let mut auth = AccountAuthorization::new();
    auth.authorize(vec![signer.account()]);

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        signer,
    );
    within(session.wait_for_stage(FlowStage::AwaitingSignature))
        .await
        .unwrap();
    within(session.sign()).await.unwrap();

    let done = within(session.wait_for(|s| s.is_complete())).await.unwrap();
    assert_eq!(done.completion.map(|s| s.to_string()).as_deref(), Some("500"));
    assert_eq!(mock.puts().len(), 1);
}

#[tokio::test]
async fn signing_waits_for_a_connected_wallet() {
    let (mock, link) = serve(Behavior::default()).await;
    let signer = Arc::new(KeypairSigner::from_seed(&[6; 32]));
    let mut auth = AccountAuthorization::new();

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        signer.clone(),
    );

    within(session.wait_for_stage(FlowStage::AwaitingAccount))
        .await
        .unwrap();
    assert_eq!(mock.post_count(), 0);
    assert!(matches!(session.sign().await, Err(FlowError::NotReady(_))));

    auth.authorize(vec![signer.account()]);
    within(session.wait_for_stage(FlowStage::AwaitingSignature))
        .await
        .unwrap();

    auth.deauthorize();
    let parked = within(session.wait_for_stage(FlowStage::AwaitingAccount))
        .await
        .unwrap();
    assert!(!parked.can_sign);
    assert!(parked.payload.is_some());
}

#[tokio::test]
async fn client_rejects_bad_descriptor_bodies() {
    for body in ["not json", r#"{"label":"","icon":"x"}"#, r#"{"icon":"x"}"#] {
        let (mock, _link) = serve(Behavior {
            get_body: body.to_string(),
            ..Behavior::default()
        })
        .await;

        let err = client(StalePayloadPolicy::default())
            .fetch_descriptor(&mock.endpoint())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClientError::InvalidResponse(_)),
            "{body}: {err:?}"
        );
    }
}

#[tokio::test]
async fn client_rejects_error_status_even_with_valid_descriptor() {
    let (mock, _link) = serve(Behavior {
        get_status: StatusCode::NOT_FOUND,
        ..Behavior::default()
    })
    .await;

    let err = client(StalePayloadPolicy::default())
        .fetch_descriptor(&mock.endpoint())
        .await
        .unwrap_err();
    match err {
        ClientError::Request(text) => assert!(text.contains("404"), "{text}"),
        other => panic!("expected a request error, got {other:?}"),
    }
    assert_eq!(mock.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unpadded_payload_data_completes_the_exchange() {
    let (mock, link) = serve(Behavior {
        payload_for: Arc::new(|_: &str| json!({ "data": "aGVsbG8", "state": "s1" })),
        ..Behavior::default()
    })
    .await;

    let signer = Arc::new(KeypairSigner::from_seed(&[3; 32]));
    let mut auth = AccountAuthorization::new();
    auth.authorize(vec![signer.account()]);

    let session = SigningSession::start(
        &link,
        client(StalePayloadPolicy::default()),
        auth.subscribe(),
        signer,
    );

    let ready = within(session.wait_for_stage(FlowStage::AwaitingSignature))
        .await
        .unwrap();
    assert_eq!(ready.display_message.as_deref(), Some("hello"));

    within(session.sign()).await.unwrap();
    within(session.wait_for_stage(FlowStage::Complete))
        .await
        .unwrap();

    let puts = mock.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0]["data"], "aGVsbG8");
    assert_eq!(puts[0]["state"], "s1");
}

#[tokio::test]
async fn client_rejects_undecodable_payload() {
    let (mock, _link) = serve(Behavior {
        payload_for: Arc::new(|_: &str| json!({ "data": "%%%", "state": "s1" })),
        ..Behavior::default()
    })
    .await;

    let account = SelectedAccount::new([0; 32]);
    let err = client(StalePayloadPolicy::default())
        .fetch_payload(&mock.endpoint(), &account)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
    assert_eq!(mock.post_count(), 1);
}
