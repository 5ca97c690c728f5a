//! Frame-driven admission control for network requests.
//!
//! The [`RequestScheduler`] decides when each [`FetchRequest`] may hit the
//! network. Throttled requests wait in a [`BoundedPriorityHeap`] and are
//! admitted once per frame by [`RequestScheduler::tick`], subject to a global
//! cap and a per-server cap.
//!
//! # Tick order
//!
//! 1. Drain transport completions and resolve their handles
//! 2. Sweep the active set, cancelling requests flagged as cancelled
//! 3. Recompute queued priorities and re-heapify
//! 4. Admit the most urgent queued requests into the open slots
//!
//! # Concurrency
//!
//! The scheduler itself is a plain `&mut self` structure. Admitted transport
//! calls run as tokio tasks and report back over an unbounded channel that is
//! only read at the top of the next tick. A completion that arrives for a
//! request that has since been cancelled is discarded.
//!
//! # Example
//!
//! ```ignore
//! use terrastream::request::{FetchRequest, RequestScheduler, Submission};
//!
//! let mut scheduler = RequestScheduler::from_current(&config, transport)?;
//!
//! match scheduler.request(FetchRequest::new(url).with_priority(distance))? {
//!     Submission::Issued(handle) => pending.push(handle),
//!     Submission::Deferred(request) => retry_next_frame.push(request),
//! }
//!
//! // once per frame
//! scheduler.tick();
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{RequestError, SchedulerError};
use super::fetch::{FetchRequest, RequestState};
use super::heap::BoundedPriorityHeap;
use crate::config::SchedulerConfig;
use crate::transport::{decode_data_url, Transport, TransportError};

// =============================================================================
// Handles
// =============================================================================

/// Identifier assigned to a request when it is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Final result of an issued request.
///
/// The request is handed back so that the caller can inspect it or reset it
/// for another attempt.
#[derive(Debug)]
pub struct RequestOutcome {
    pub request: FetchRequest,
    pub result: Result<Bytes, RequestError>,
}

/// Non-blocking view of a [`RequestHandle`].
#[derive(Debug)]
pub enum HandleStatus {
    /// Not resolved yet.
    Pending,
    /// Resolved; the outcome has been taken out of the handle.
    Ready(RequestOutcome),
    /// The scheduler went away, or the outcome was already taken.
    Closed,
}

/// Completion handle for an issued request.
///
/// Resolves exactly once. Await it from async code, or call
/// [`poll_outcome`](Self::poll_outcome) once per frame.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    receiver: oneshot::Receiver<RequestOutcome>,
    cancel_token: CancellationToken,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Requests cancellation; takes effect on the scheduler's next tick.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn poll_outcome(&mut self) -> HandleStatus {
        match self.receiver.try_recv() {
            Ok(outcome) => HandleStatus::Ready(outcome),
            Err(oneshot::error::TryRecvError::Empty) => HandleStatus::Pending,
            Err(oneshot::error::TryRecvError::Closed) => HandleStatus::Closed,
        }
    }
}

impl Future for RequestHandle {
    type Output = Option<RequestOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(Result::ok)
    }
}

/// Result of [`RequestScheduler::request`].
#[derive(Debug)]
pub enum Submission {
    /// Accepted; the handle resolves when the request finishes.
    Issued(RequestHandle),
    /// Not accepted this frame. The request is returned untouched
    /// (`Unissued`) so it can be submitted again later.
    Deferred(FetchRequest),
}

impl Submission {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Submission::Deferred(_))
    }

    pub fn into_handle(self) -> Option<RequestHandle> {
        match self {
            Submission::Issued(handle) => Some(handle),
            Submission::Deferred(_) => None,
        }
    }
}

/// Counters describing scheduler activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestStatistics {
    /// Scheduled submissions, including deferred ones.
    pub attempted: u64,
    /// Requests currently in flight.
    pub active: usize,
    /// Requests ever admitted.
    pub active_ever: u64,
    pub received: u64,
    pub cancelled: u64,
    /// Cancelled while in flight.
    pub cancelled_active: u64,
    pub failed: u64,
}

// =============================================================================
// Scheduler
// =============================================================================

struct PendingRequest {
    id: RequestId,
    request: FetchRequest,
    sender: oneshot::Sender<RequestOutcome>,
}

struct ActiveRequest {
    request: FetchRequest,
    sender: oneshot::Sender<RequestOutcome>,
}

struct Completion {
    id: RequestId,
    result: Result<Bytes, TransportError>,
}

/// Global and per-server admission controller.
pub struct RequestScheduler {
    maximum_requests: usize,
    maximum_requests_per_server: usize,
    requests_by_server: HashMap<String, usize>,
    throttle_requests: bool,

    heap: BoundedPriorityHeap<PendingRequest>,
    active: BTreeMap<RequestId, ActiveRequest>,
    active_by_server: HashMap<String, usize>,

    transport: Arc<dyn Transport>,
    runtime: Handle,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,

    next_id: u64,
    statistics: RequestStatistics,
    logged_statistics: RequestStatistics,
}

impl RequestScheduler {
    /// Creates a scheduler that spawns transport calls on `runtime`.
    pub fn new(config: &SchedulerConfig, transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        info!(
            maximum_requests = config.maximum_requests,
            maximum_requests_per_server = config.maximum_requests_per_server,
            priority_heap_length = config.priority_heap_length,
            throttle_requests = config.throttle_requests,
            "Request scheduler created"
        );

        Self {
            maximum_requests: config.maximum_requests,
            maximum_requests_per_server: config.maximum_requests_per_server,
            requests_by_server: config.requests_by_server.clone(),
            throttle_requests: config.throttle_requests,
            heap: BoundedPriorityHeap::new(
                config.priority_heap_length,
                |a: &PendingRequest, b: &PendingRequest| {
                    a.request.priority.total_cmp(&b.request.priority)
                },
            ),
            active: BTreeMap::new(),
            active_by_server: HashMap::new(),
            transport,
            runtime,
            completion_tx,
            completion_rx,
            next_id: 0,
            statistics: RequestStatistics::default(),
            logged_statistics: RequestStatistics::default(),
        }
    }

    /// Creates a scheduler bound to the runtime of the calling context.
    pub fn from_current(
        config: &SchedulerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;
        Ok(Self::new(config, transport, runtime))
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submits a request.
    ///
    /// Returns [`Submission::Deferred`] when the request cannot be accepted
    /// this frame: the global cap is reached, its server is saturated, or it
    /// is the least urgent request and the heap is full. Queuing a request
    /// may push a less urgent queued request out of the heap, which is then
    /// cancelled.
    pub fn request(&mut self, mut request: FetchRequest) -> Result<Submission, SchedulerError> {
        if request.state.is_live() {
            return Err(SchedulerError::AlreadyIssued {
                url: request.url().to_string(),
            });
        }

        if request.is_local_url() {
            return Ok(Submission::Issued(self.start_local(request)));
        }

        self.statistics.attempted += 1;

        if request.server_key.is_none() {
            request.server_key = Some(server_key(request.url())?);
        }

        if !self.throttle_requests || !request.is_throttled() {
            let (id, sender, handle) = self.issue(&mut request);
            self.start_request(id, request, sender);
            return Ok(Submission::Issued(handle));
        }

        if self.active.len() >= self.maximum_requests {
            debug!(url = request.url(), "Active requests saturated, deferring");
            return Ok(Submission::Deferred(request));
        }

        if request.throttle_by_server() {
            let key = request.server_key.as_deref().unwrap_or_default();
            if !self.server_has_open_slots(key, 1) {
                debug!(url = request.url(), server = key, "Server saturated, deferring");
                return Ok(Submission::Deferred(request));
            }
        }

        request.update_priority();
        let (id, sender, handle) = self.issue(&mut request);

        if let Some(evicted) = self.heap.insert(PendingRequest {
            id,
            request,
            sender,
        }) {
            if evicted.id == id {
                let mut request = evicted.request;
                request.state = RequestState::Unissued;
                debug!(url = request.url(), "Priority heap full, deferring");
                return Ok(Submission::Deferred(request));
            }
            debug!(
                url = evicted.request.url(),
                priority = evicted.request.priority,
                "Evicted from priority heap"
            );
            self.cancel_entry(evicted.request, evicted.sender);
        }

        Ok(Submission::Issued(handle))
    }

    /// Runs one frame of admission control.
    pub fn tick(&mut self) {
        self.drain_completions();

        // Sweep
        let cancelled: Vec<RequestId> = self
            .active
            .iter()
            .filter(|(_, entry)| entry.request.is_cancelled())
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            if let Some(entry) = self.active.remove(&id) {
                self.cancel_entry(entry.request, entry.sender);
            }
        }

        // Re-prioritize
        for pending in self.heap.iter_mut() {
            pending.request.update_priority();
        }
        self.heap.resort();

        // Fill open slots
        let open_slots = self.maximum_requests.saturating_sub(self.active.len());
        let mut filled = 0;
        while filled < open_slots {
            let Some(pending) = self.heap.pop() else {
                break;
            };

            if pending.request.is_cancelled() {
                self.cancel_entry(pending.request, pending.sender);
                continue;
            }

            if pending.request.throttle_by_server() {
                let key = pending.request.server_key.as_deref().unwrap_or_default();
                if !self.server_has_open_slots(key, 1) {
                    self.cancel_entry(pending.request, pending.sender);
                    continue;
                }
            }

            self.start_request(pending.id, pending.request, pending.sender);
            filled += 1;
        }

        self.log_statistics();
    }

    /// Flags the request `id` as cancelled.
    ///
    /// Takes effect on the next tick. Returns false if the request is neither
    /// queued nor active.
    pub fn cancel(&self, id: RequestId) -> bool {
        if let Some(entry) = self.active.get(&id) {
            entry.request.cancel();
            return true;
        }
        match self.heap.iter().find(|pending| pending.id == id) {
            Some(pending) => {
                pending.request.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every queued and active request.
    pub fn clear(&mut self) {
        for pending in self.heap.drain() {
            self.cancel_entry(pending.request, pending.sender);
        }
        let active = std::mem::take(&mut self.active);
        for (_, entry) in active {
            self.cancel_entry(entry.request, entry.sender);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns true if `desired` more requests to `server_key` fit under its cap.
    pub fn server_has_open_slots(&self, server_key: &str, desired: usize) -> bool {
        let cap = self.server_limit(server_key);
        let active = self.active_count_for_server(server_key);
        active + desired <= cap
    }

    /// Returns true if `desired` more requests fit in the priority heap.
    pub fn heap_has_open_slot(&self, desired: usize) -> bool {
        self.heap.len() + desired <= self.heap.maximum_length()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_count_for_server(&self, server_key: &str) -> usize {
        self.active_by_server.get(server_key).copied().unwrap_or(0)
    }

    pub fn queued_count(&self) -> usize {
        self.heap.len()
    }

    /// Effective concurrency cap for a server.
    pub fn server_limit(&self, server_key: &str) -> usize {
        self.requests_by_server
            .get(server_key)
            .copied()
            .unwrap_or(self.maximum_requests_per_server)
    }

    pub fn statistics(&self) -> RequestStatistics {
        self.statistics
    }

    pub fn maximum_requests(&self) -> usize {
        self.maximum_requests
    }

    pub fn maximum_requests_per_server(&self) -> usize {
        self.maximum_requests_per_server
    }

    pub fn priority_heap_length(&self) -> usize {
        self.heap.maximum_length()
    }

    pub fn throttle_requests(&self) -> bool {
        self.throttle_requests
    }

    // =========================================================================
    // Runtime knobs
    // =========================================================================

    pub fn set_maximum_requests(&mut self, maximum_requests: usize) {
        self.maximum_requests = maximum_requests;
    }

    pub fn set_maximum_requests_per_server(&mut self, maximum_requests_per_server: usize) {
        self.maximum_requests_per_server = maximum_requests_per_server;
    }

    /// Replaces the per-server override table.
    pub fn set_requests_by_server(&mut self, requests_by_server: HashMap<String, usize>) {
        self.requests_by_server = requests_by_server;
    }

    /// Overrides the cap for one server key.
    pub fn set_server_limit(&mut self, server_key: impl Into<String>, limit: usize) {
        self.requests_by_server.insert(server_key.into(), limit);
    }

    /// Resizes the priority heap. Shrinking cancels the least urgent queued
    /// requests that no longer fit.
    pub fn set_priority_heap_length(&mut self, length: usize) {
        for evicted in self.heap.set_maximum_length(length) {
            self.cancel_entry(evicted.request, evicted.sender);
        }
    }

    pub fn set_throttle_requests(&mut self, throttle_requests: bool) {
        self.throttle_requests = throttle_requests;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn issue(
        &mut self,
        request: &mut FetchRequest,
    ) -> (RequestId, oneshot::Sender<RequestOutcome>, RequestHandle) {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let (sender, receiver) = oneshot::channel();
        request.state = RequestState::Issued;

        let handle = RequestHandle {
            id,
            receiver,
            cancel_token: request.cancel_token.clone(),
        };
        (id, sender, handle)
    }

    fn start_request(
        &mut self,
        id: RequestId,
        mut request: FetchRequest,
        sender: oneshot::Sender<RequestOutcome>,
    ) {
        request.state = RequestState::Active;

        let key = request.server_key.clone().unwrap_or_default();
        *self.active_by_server.entry(key).or_insert(0) += 1;
        self.statistics.active += 1;
        self.statistics.active_ever += 1;

        debug!(
            id = %id,
            url = request.url(),
            priority = request.priority,
            "Starting request"
        );

        let call = self.transport.send(request.to_transport_request());
        let token = request.cancel_token.clone();
        let completion_tx = self.completion_tx.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = call => {
                    let _ = completion_tx.send(Completion { id, result });
                }
            }
        });

        self.active.insert(id, ActiveRequest { request, sender });
    }

    /// Resolves a `data:` or `blob:` request without the transport.
    ///
    /// The handle is ready before this returns. `blob:` URLs always fail.
    fn start_local(&mut self, mut request: FetchRequest) -> RequestHandle {
        let (id, sender, handle) = self.issue(&mut request);

        let result = decode_data_url(request.url()).map_err(RequestError::from);
        request.state = match &result {
            Ok(_) => RequestState::Received,
            Err(_) => RequestState::Failed,
        };
        debug!(id = %id, state = %request.state, "Resolved local request");

        let _ = sender.send(RequestOutcome { request, result });
        handle
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            let cancelled = match self.active.get(&completion.id) {
                Some(entry) => entry.request.is_cancelled(),
                None => {
                    debug!(id = %completion.id, "Discarding late completion");
                    continue;
                }
            };
            // The sweep settles cancelled requests.
            if cancelled {
                continue;
            }

            let Some(ActiveRequest {
                mut request,
                sender,
            }) = self.active.remove(&completion.id)
            else {
                continue;
            };
            self.release_slot(&request);

            let result = match completion.result {
                Ok(bytes) => {
                    request.state = RequestState::Received;
                    self.statistics.received += 1;
                    Ok(bytes)
                }
                Err(error) => {
                    request.state = RequestState::Failed;
                    self.statistics.failed += 1;
                    debug!(url = request.url(), error = %error, "Request failed");
                    Err(RequestError::Transport(error))
                }
            };
            let _ = sender.send(RequestOutcome { request, result });
        }
    }

    fn cancel_entry(&mut self, mut request: FetchRequest, sender: oneshot::Sender<RequestOutcome>) {
        let was_active = request.state == RequestState::Active;
        request.state = RequestState::Cancelled;
        request.cancel_token.cancel();
        self.statistics.cancelled += 1;

        if was_active {
            self.release_slot(&request);
            self.statistics.cancelled_active += 1;
        }

        if let Some(hook) = request.take_cancel_hook() {
            hook();
        }

        let _ = sender.send(RequestOutcome {
            request,
            result: Err(RequestError::Cancelled),
        });
    }

    fn release_slot(&mut self, request: &FetchRequest) {
        self.statistics.active = self.statistics.active.saturating_sub(1);
        if let Some(key) = request.server_key.as_deref() {
            if let Some(count) = self.active_by_server.get_mut(key) {
                *count = count.saturating_sub(1);
            }
        }
    }

    fn log_statistics(&mut self) {
        if self.statistics == self.logged_statistics {
            return;
        }
        let stats = self.statistics;
        debug!(
            attempted = stats.attempted,
            active = stats.active,
            active_ever = stats.active_ever,
            received = stats.received,
            cancelled = stats.cancelled,
            cancelled_active = stats.cancelled_active,
            failed = stats.failed,
            queued = self.heap.len(),
            "Request statistics"
        );
        self.logged_statistics = stats;
    }
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("maximum_requests", &self.maximum_requests)
            .field("maximum_requests_per_server", &self.maximum_requests_per_server)
            .field("throttle_requests", &self.throttle_requests)
            .field("active", &self.active.len())
            .field("queued", &self.heap.len())
            .finish()
    }
}

/// Normalized `host:port` for a URL.
///
/// The port defaults to 443 for `https` and 80 otherwise.
pub fn server_key(url: &str) -> Result<String, SchedulerError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| SchedulerError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| SchedulerError::InvalidUrl {
        url: url.to_string(),
        reason: "URL has no host".to_string(),
    })?;
    let port = parsed
        .port()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    Ok(format!("{}:{}", host.to_ascii_lowercase(), port))
}

// =============================================================================
// Tests
// =============================================================================
