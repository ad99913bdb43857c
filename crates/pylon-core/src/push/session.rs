//! Client push sessions.
//!
//! A session owns one framed socket and runs three cooperating loops:
//!
//! - the **read loop** decodes inbound frames (filters or requests) into a
//!   bounded channel;
//! - the **write loop** drains outbound records (events or responses) onto
//!   the socket;
//! - the **control loop** reacts to role inputs and owns shutdown.
//!
//! Any loop that observes a socket failure cancels the shared stop token;
//! the control loop then stops the other two, invokes the unregister
//! callback exactly once, closes the socket and drops its callback
//! references.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use super::codec::Codec;
use super::dispatch::{dispatch_request, DispatchContext, DispatchError, Request, Response};
use super::event::Event;
use super::filter::PushFilter;
use super::socket::FrameSocket;

/// Capacity of the inbound request and filter channels.
const READ_BUFFER: usize = 8;

/// Role a session is constructed with, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Event fan-out with client-supplied filters.
    Event,
    /// Request/response dispatch over the same socket.
    Api,
}

/// Callback invoked exactly once when the session terminates.
pub type UnregisterFn = Box<dyn FnOnce(&PushSession) + Send>;

/// A long-lived bidirectional session with one client.
pub struct PushSession {
    id: String,
    role: SessionRole,
    start_time: DateTime<Utc>,
    parameters: HashMap<String, String>,
    headers: HashMap<String, String>,
    identity: Vec<String>,

    socket: Arc<dyn FrameSocket>,
    codec: Arc<dyn Codec>,

    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    filters_tx: mpsc::Sender<PushFilter>,
    filters_rx: Mutex<Option<mpsc::Receiver<PushFilter>>>,
    requests_tx: mpsc::Sender<Request>,
    requests_rx: Mutex<Option<mpsc::Receiver<Request>>>,
    responses_tx: mpsc::Sender<Response>,
    responses_rx: Mutex<Option<mpsc::Receiver<Response>>>,

    filter: Mutex<Option<PushFilter>>,

    stop_all: CancellationToken,
    stop_read: CancellationToken,
    stop_write: CancellationToken,

    dispatch: Mutex<Option<DispatchContext>>,
    unregister: Mutex<Option<UnregisterFn>>,
}

impl PushSession {
    /// Creates an event session over `socket`.
    #[must_use]
    pub fn new_event_session(
        socket: Arc<dyn FrameSocket>,
        codec: Arc<dyn Codec>,
        parameters: HashMap<String, String>,
        headers: HashMap<String, String>,
        identity: Vec<String>,
        unregister: UnregisterFn,
    ) -> Arc<Self> {
        Self::new(
            SessionRole::Event,
            socket,
            codec,
            parameters,
            headers,
            identity,
            None,
            unregister,
        )
    }

    /// Creates an API session over `socket`, dispatching requests through
    /// the collaborators in `dispatch`.
    #[must_use]
    pub fn new_api_session(
        socket: Arc<dyn FrameSocket>,
        codec: Arc<dyn Codec>,
        parameters: HashMap<String, String>,
        headers: HashMap<String, String>,
        identity: Vec<String>,
        dispatch: DispatchContext,
        unregister: UnregisterFn,
    ) -> Arc<Self> {
        Self::new(
            SessionRole::Api,
            socket,
            codec,
            parameters,
            headers,
            identity,
            Some(dispatch),
            unregister,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        role: SessionRole,
        socket: Arc<dyn FrameSocket>,
        codec: Arc<dyn Codec>,
        parameters: HashMap<String, String>,
        headers: HashMap<String, String>,
        identity: Vec<String>,
        dispatch: Option<DispatchContext>,
        unregister: UnregisterFn,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(1);
        let (filters_tx, filters_rx) = mpsc::channel(READ_BUFFER);
        let (requests_tx, requests_rx) = mpsc::channel(READ_BUFFER);
        let (responses_tx, responses_rx) = mpsc::channel(READ_BUFFER);

        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            role,
            start_time: Utc::now(),
            parameters,
            headers,
            identity,
            socket,
            codec,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            filters_tx,
            filters_rx: Mutex::new(Some(filters_rx)),
            requests_tx,
            requests_rx: Mutex::new(Some(requests_rx)),
            responses_tx,
            responses_rx: Mutex::new(Some(responses_rx)),
            filter: Mutex::new(None),
            stop_all: CancellationToken::new(),
            stop_read: CancellationToken::new(),
            stop_write: CancellationToken::new(),
            dispatch: Mutex::new(dispatch),
            unregister: Mutex::new(Some(unregister)),
        })
    }

    /// Unique identifier of the session.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.id
    }

    /// Role the session was constructed with.
    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// When the session was accepted. Events stamped earlier are never
    /// delivered.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Query parameters captured at connect time.
    #[must_use]
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Headers captured at connect time.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Identity claims attached to the session at accept time.
    #[must_use]
    pub fn identity(&self) -> &[String] {
        &self.identity
    }

    /// Stops the session from the server side.
    pub fn close(&self) {
        self.stop_all.cancel();
    }

    /// Delivers events to the session, blocking until the write loop accepts
    /// each one. The blocking is intentional backpressure on event producers.
    ///
    /// Events stamped before the session started are silently dropped. This
    /// is the only entry point for event delivery; the installed filter is
    /// evaluated by the write loop at send time, not here.
    pub async fn direct_push(&self, events: Vec<Event>) {
        for event in events {
            if event.timestamp < self.start_time {
                continue;
            }
            if self.events_tx.send(event).await.is_err() {
                return;
            }
        }
    }

    /// Runs the session until the peer disconnects, `shutdown` fires or an
    /// internal failure stops it. The unregister callback has run by the
    /// time this returns.
    pub async fn listen(self: Arc<Self>, shutdown: CancellationToken) {
        match self.role {
            SessionRole::Event => self.listen_to_push_events(shutdown).await,
            SessionRole::Api => self.listen_to_api_requests(shutdown).await,
        }
    }

    /// Point-in-time clone of the installed filter.
    fn current_filter(&self) -> Option<PushFilter> {
        self.filter.lock().clone()
    }

    fn set_current_filter(&self, filter: PushFilter) {
        *self.filter.lock() = Some(filter);
    }

    async fn read_filters(self: Arc<Self>) {
        loop {
            let frame = match self.socket.recv().await {
                Ok(frame) => frame,
                Err(_) => {
                    self.stop_all.cancel();
                    return;
                }
            };

            let filter = match self.codec.decode_filter(&frame) {
                Ok(filter) => filter,
                Err(err) => {
                    // Protocol violation; terminal for the session.
                    debug!(session = %self.id, error = %err, "malformed filter frame");
                    self.stop_all.cancel();
                    return;
                }
            };

            tokio::select! {
                sent = self.filters_tx.send(filter) => {
                    if sent.is_err() {
                        return;
                    }
                }
                () = self.stop_read.cancelled() => return,
            }
        }
    }

    async fn read_requests(self: Arc<Self>) {
        loop {
            let frame = match self.socket.recv().await {
                Ok(frame) => frame,
                Err(_) => {
                    self.stop_all.cancel();
                    return;
                }
            };

            let request = match self.codec.decode_request(&frame) {
                Ok(request) => request,
                Err(err) => {
                    debug!(session = %self.id, error = %err, "malformed request frame");
                    self.stop_all.cancel();
                    return;
                }
            };

            tokio::select! {
                sent = self.requests_tx.send(request) => {
                    if sent.is_err() {
                        return;
                    }
                }
                () = self.stop_read.cancelled() => return,
            }
        }
    }

    async fn write_events(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { return };

                    if let Some(filter) = self.current_filter() {
                        if filter.is_filtered_out(&event.identity, event.kind) {
                            continue;
                        }
                    }

                    let frame = match self.codec.encode_event(&event) {
                        Ok(frame) => frame,
                        Err(err) => {
                            error!(session = %self.id, error = %err, "dropping unencodable event");
                            continue;
                        }
                    };

                    if self.socket.send(&frame).await.is_err() {
                        self.stop_all.cancel();
                        return;
                    }
                }
                () = self.stop_write.cancelled() => return,
            }
        }
    }

    async fn write_responses(self: Arc<Self>, mut responses: mpsc::Receiver<Response>) {
        loop {
            tokio::select! {
                response = responses.recv() => {
                    let Some(response) = response else { return };

                    let frame = match self.codec.encode_response(&response) {
                        Ok(frame) => frame,
                        Err(err) => {
                            error!(session = %self.id, error = %err, "dropping unencodable response");
                            continue;
                        }
                    };

                    if self.socket.send(&frame).await.is_err() {
                        self.stop_all.cancel();
                        return;
                    }
                }
                () = self.stop_write.cancelled() => return,
            }
        }
    }

    async fn listen_to_push_events(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(events) = self.events_rx.lock().take() else { return };
        let Some(mut filters) = self.filters_rx.lock().take() else { return };

        let reader = tokio::spawn(Arc::clone(&self).read_filters());
        let writer = tokio::spawn(Arc::clone(&self).write_events(events));

        loop {
            tokio::select! {
                filter = filters.recv() => {
                    let Some(filter) = filter else { break };
                    self.set_current_filter(filter);
                }
                () = shutdown.cancelled() => break,
                () = self.stop_all.cancelled() => break,
            }
        }

        self.teardown().await;
        let _ = tokio::join!(reader, writer);
    }

    async fn listen_to_api_requests(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut requests) = self.requests_rx.lock().take() else { return };
        let Some(responses) = self.responses_rx.lock().take() else { return };

        let reader = tokio::spawn(Arc::clone(&self).read_requests());
        let writer = tokio::spawn(Arc::clone(&self).write_responses(responses));

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(mut request) = request else { break };

                    // Backport the session token into the request credentials.
                    if let Some(token) = self.parameters.get("token") {
                        if !token.is_empty() {
                            request.username = "Bearer".to_string();
                            request.password = token.clone();
                        }
                    }

                    let session = Arc::clone(&self);
                    tokio::spawn(async move {
                        session.handle_request(request).await;
                    });
                }
                () = shutdown.cancelled() => break,
                () = self.stop_all.cancelled() => break,
            }
        }

        self.teardown().await;
        let _ = tokio::join!(reader, writer);
    }

    /// Runs one request through the dispatcher. A panicking handler is
    /// caught at the task boundary and answered with a 500 so it cannot take
    /// the session down.
    async fn handle_request(self: Arc<Self>, request: Request) {
        let Some(context) = self.dispatch.lock().clone() else { return };
        let request_id = request.id.clone();

        let handler = tokio::spawn(async move { dispatch_request(&context, &request).await });

        let response = match handler.await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => err.to_response(&request_id),
            Err(join_err) => {
                if !join_err.is_panic() {
                    return;
                }
                let reason = join_err.into_panic();
                let description = reason
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| reason.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unexpected internal failure".to_string());
                error!(session = %self.id, reason = %description, "request handler panicked");
                DispatchError::internal(&description).to_response(&request_id)
            }
        };

        let _ = self.responses_tx.send(response).await;
    }

    async fn teardown(self: &Arc<Self>) {
        self.stop_read.cancel();
        self.stop_write.cancel();

        if let Some(unregister) = self.unregister.lock().take() {
            unregister(self);
        }

        self.socket.close().await;
        self.dispatch.lock().take();
    }
}

impl fmt::Display for PushSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<session id:{} headers:{:?} parameters:{:?}>",
            self.id, self.headers, self.parameters
        )
    }
}
