//! Scenario tests for push sessions over in-process socket pairs.
//!
//! The "peer" half of each pair plays the client: it sends codec-encoded
//! filter or request frames and reads back what the session emits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pylon_core::push::socket::memory::{socket_pair, MemorySocket};
use pylon_core::push::{
    DispatchContext, DispatchError, Event, EventKind, FrameSocket, JsonCodec, Operation, Payload,
    Processor, ProcessorFinder, ProcessorOutput, PushFilter, PushSession, Request, Response,
};
use tokio_util::sync::CancellationToken;

struct SessionFixture {
    session: Arc<PushSession>,
    peer: Arc<MemorySocket>,
    unregistered: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    listener: tokio::task::JoinHandle<()>,
}

fn spawn_event_session(parameters: HashMap<String, String>) -> SessionFixture {
    let (socket, peer) = socket_pair();
    let unregistered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&unregistered);

    let session = PushSession::new_event_session(
        Arc::new(socket),
        Arc::new(JsonCodec),
        parameters,
        HashMap::new(),
        Vec::new(),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let shutdown = CancellationToken::new();
    let listener = tokio::spawn(Arc::clone(&session).listen(shutdown.clone()));

    SessionFixture { session, peer: Arc::new(peer), unregistered, shutdown, listener }
}

fn spawn_api_session(
    parameters: HashMap<String, String>,
    dispatch: DispatchContext,
) -> SessionFixture {
    let (socket, peer) = socket_pair();
    let unregistered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&unregistered);

    let session = PushSession::new_api_session(
        Arc::new(socket),
        Arc::new(JsonCodec),
        parameters,
        HashMap::new(),
        Vec::new(),
        dispatch,
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let shutdown = CancellationToken::new();
    let listener = tokio::spawn(Arc::clone(&session).listen(shutdown.clone()));

    SessionFixture { session, peer: Arc::new(peer), unregistered, shutdown, listener }
}

async fn recv_frame(peer: &MemorySocket, timeout_ms: u64) -> Option<Vec<u8>> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), peer.recv())
        .await
        .ok()
        .and_then(Result::ok)
}

fn event(identity: &str) -> Event {
    Event::new(EventKind::Create, identity, serde_json::Value::Null)
}

fn request(id: &str, operation: Operation, identity: &str, object_id: Option<&str>) -> Request {
    Request {
        id: id.to_string(),
        operation,
        identity: identity.to_string(),
        object_id: object_id.map(ToString::to_string),
        parameters: HashMap::new(),
        username: String::new(),
        password: String::new(),
        data: None,
    }
}

async fn send_request(peer: &MemorySocket, request: &Request) {
    peer.send(&serde_json::to_vec(request).unwrap()).await.unwrap();
}

async fn recv_response(peer: &MemorySocket) -> Response {
    let frame = recv_frame(peer, 2_000).await.expect("no response frame");
    serde_json::from_slice(&frame).unwrap()
}

/// Test processor: answers with a 200 echo, panics when asked to.
struct TestProcessor;

#[async_trait]
impl Processor for TestProcessor {
    async fn process(&self, request: &Request) -> Result<ProcessorOutput, DispatchError> {
        if request.object_id.as_deref() == Some("boom") {
            panic!("processor exploded");
        }

        let mut response = Response::for_request(request);
        response.data = Some(Payload::Single(serde_json::json!({
            "username": request.username,
            "password": request.password,
        })));
        Ok(ProcessorOutput::response(response))
    }
}

struct TestFinder;

impl ProcessorFinder for TestFinder {
    fn find(&self, identity: &str) -> Option<Arc<dyn Processor>> {
        (identity == "objects").then(|| Arc::new(TestProcessor) as Arc<dyn Processor>)
    }
}

fn dispatch_context() -> DispatchContext {
    DispatchContext::new(Arc::new(TestFinder))
}

#[tokio::test]
async fn test_events_flow_without_filter() {
    let fixture = spawn_event_session(HashMap::new());

    fixture.session.direct_push(vec![event("objects")]).await;

    let frame = recv_frame(&fixture.peer, 2_000).await.expect("no event frame");
    let received: Event = serde_json::from_slice(&frame).unwrap();
    assert_eq!(received.identity, "objects");
}

#[tokio::test]
async fn test_filter_suppresses_unwanted_identities() {
    let fixture = spawn_event_session(HashMap::new());

    // Accept only "wanted" events.
    let mut filter = PushFilter::new();
    filter.filter_identity("wanted", &[]);
    fixture
        .peer
        .send(&serde_json::to_vec(&filter).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fixture.session.direct_push(vec![event("ignored")]).await;
    fixture.session.direct_push(vec![event("wanted")]).await;

    let frame = recv_frame(&fixture.peer, 2_000).await.expect("no event frame");
    let received: Event = serde_json::from_slice(&frame).unwrap();
    assert_eq!(received.identity, "wanted", "filtered event leaked through");

    assert!(
        recv_frame(&fixture.peer, 100).await.is_none(),
        "exactly one frame expected"
    );
}

#[tokio::test]
async fn test_newest_filter_wins() {
    let fixture = spawn_event_session(HashMap::new());

    let mut first = PushFilter::new();
    first.filter_identity("a", &[]);
    fixture.peer.send(&serde_json::to_vec(&first).unwrap()).await.unwrap();

    let mut second = PushFilter::new();
    second.filter_identity("b", &[]);
    fixture.peer.send(&serde_json::to_vec(&second).unwrap()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fixture.session.direct_push(vec![event("a"), event("b")]).await;

    let frame = recv_frame(&fixture.peer, 2_000).await.expect("no event frame");
    let received: Event = serde_json::from_slice(&frame).unwrap();
    assert_eq!(received.identity, "b");
}

#[tokio::test]
async fn test_events_before_session_start_are_dropped() {
    let fixture = spawn_event_session(HashMap::new());
    let start = fixture.session.start_time();

    let mut before = event("objects");
    before.timestamp = start - chrono::Duration::seconds(1);
    let mut at_start = event("objects");
    at_start.timestamp = start;
    let mut after = event("objects");
    after.timestamp = start + chrono::Duration::seconds(1);

    fixture
        .session
        .direct_push(vec![before, at_start.clone(), after.clone()])
        .await;

    let first: Event =
        serde_json::from_slice(&recv_frame(&fixture.peer, 2_000).await.unwrap()).unwrap();
    let second: Event =
        serde_json::from_slice(&recv_frame(&fixture.peer, 2_000).await.unwrap()).unwrap();

    assert_eq!(first.timestamp, at_start.timestamp);
    assert_eq!(second.timestamp, after.timestamp);
    assert!(recv_frame(&fixture.peer, 100).await.is_none());
}

#[tokio::test]
async fn test_unregister_once_on_peer_close() {
    let fixture = spawn_event_session(HashMap::new());

    fixture.peer.close().await;
    fixture.listener.await.unwrap();

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregister_once_on_cancellation() {
    let fixture = spawn_event_session(HashMap::new());

    fixture.shutdown.cancel();
    fixture.listener.await.unwrap();

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);

    // A peer close after the fact must not unregister again.
    fixture.peer.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregister_once_on_server_side_close() {
    let fixture = spawn_event_session(HashMap::new());

    fixture.session.close();
    fixture.listener.await.unwrap();

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregister_once_when_both_loops_see_the_failure() {
    let fixture = spawn_event_session(HashMap::new());

    // Closing the transport fails the read loop and any in-flight write at
    // the same time; the session must still unregister exactly once.
    fixture.peer.close().await;
    fixture.session.direct_push(vec![event("objects")]).await;
    fixture.listener.await.unwrap();

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_filter_terminates_session() {
    let fixture = spawn_event_session(HashMap::new());

    fixture.peer.send(b"not a filter").await.unwrap();
    fixture.listener.await.unwrap();

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_api_request_roundtrip() {
    let fixture = spawn_api_session(HashMap::new(), dispatch_context());

    send_request(
        &fixture.peer,
        &request("r1", Operation::Retrieve, "objects", Some("x")),
    )
    .await;

    let response = recv_response(&fixture.peer).await;
    assert_eq!(response.request_id, "r1");
    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn test_api_unknown_identity_is_404() {
    let fixture = spawn_api_session(HashMap::new(), dispatch_context());

    send_request(&fixture.peer, &request("r1", Operation::Retrieve, "ghosts", None)).await;

    let response = recv_response(&fixture.peer).await;
    assert_eq!(response.status_code, 404);
}

#[tokio::test]
async fn test_api_panic_becomes_500_and_session_survives() {
    let fixture = spawn_api_session(HashMap::new(), dispatch_context());

    send_request(
        &fixture.peer,
        &request("r1", Operation::Create, "objects", Some("boom")),
    )
    .await;

    let response = recv_response(&fixture.peer).await;
    assert_eq!(response.request_id, "r1");
    assert_eq!(response.status_code, 500);
    assert!(response.error.unwrap().contains("Internal Server Error"));

    // The session is still serving.
    send_request(
        &fixture.peer,
        &request("r2", Operation::Retrieve, "objects", Some("fine")),
    )
    .await;
    let response = recv_response(&fixture.peer).await;
    assert_eq!(response.request_id, "r2");
    assert_eq!(response.status_code, 200);

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_api_backports_session_token_into_credentials() {
    let parameters = HashMap::from([("token".to_string(), "secret".to_string())]);
    let fixture = spawn_api_session(parameters, dispatch_context());

    send_request(&fixture.peer, &request("r1", Operation::Retrieve, "objects", None)).await;

    let response = recv_response(&fixture.peer).await;
    let Some(Payload::Single(echo)) = response.data else {
        panic!("expected a single payload");
    };
    assert_eq!(echo["username"], "Bearer");
    assert_eq!(echo["password"], "secret");
}

#[tokio::test]
async fn test_api_session_closes_like_event_session() {
    let fixture = spawn_api_session(HashMap::new(), dispatch_context());

    fixture.peer.close().await;
    fixture.listener.await.unwrap();

    assert_eq!(fixture.unregistered.load(Ordering::SeqCst), 1);
}
