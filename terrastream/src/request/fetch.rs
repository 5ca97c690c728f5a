//! A single schedulable network request.
//!
//! A [`FetchRequest`] describes what to download and how the scheduler should
//! treat it: its priority (lower is more urgent), whether it participates in
//! throttling, and what to do when it is cancelled.
//!
//! # State machine
//!
//! ```text
//! Unissued ──► Issued ──► Active ──► Received
//!                 │          │   └──► Failed
//!                 └──────────┴──────► Cancelled
//! ```
//!
//! Terminal requests may be returned to `Unissued` through
//! [`check_and_reset`](super::check_and_reset) to be submitted again.
//!
//! # Example
//!
//! ```ignore
//! use terrastream::request::FetchRequest;
//!
//! let request = FetchRequest::new("https://tiles.example.com/5/10/12.png")
//!     .with_priority_fn(move || camera_distance_to(tile))
//!     .with_retry_limit(3);
//! ```

use std::fmt;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::transport::{Method, ResponseType, TransportRequest};

/// Lifecycle state of a [`FetchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Not yet submitted, or reset for another attempt.
    Unissued,
    /// Queued in the scheduler; a completion handle exists.
    Issued,
    /// Admitted; the transport call is in flight.
    Active,
    Received,
    Failed,
    Cancelled,
}

impl RequestState {
    /// Issued or Active.
    pub fn is_live(&self) -> bool {
        matches!(self, RequestState::Issued | RequestState::Active)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Unissued => "unissued",
            RequestState::Issued => "issued",
            RequestState::Active => "active",
            RequestState::Received => "received",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Computes a request's priority. Lower values are more urgent.
pub type PriorityFn = Box<dyn Fn() -> f64 + Send + Sync>;

/// Invoked once when a request is cancelled.
pub type CancelHook = Box<dyn FnOnce() + Send>;

/// Default number of retries a request allows.
pub const DEFAULT_RETRY_LIMIT: u32 = 0;

/// A network request managed by the [`RequestScheduler`](super::RequestScheduler).
pub struct FetchRequest {
    url: String,
    method: Method,
    response_type: ResponseType,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,

    pub(crate) state: RequestState,
    pub(crate) priority: f64,
    priority_fn: Option<PriorityFn>,
    throttle: bool,
    throttle_by_server: bool,
    pub(crate) server_key: Option<String>,
    pub(crate) cancel_token: CancellationToken,
    cancel_hook: Option<CancelHook>,

    pub(crate) retry_count: u32,
    retry_limit: u32,
}

impl FetchRequest {
    /// Creates a throttled GET request for raw bytes.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            response_type: ResponseType::ArrayBuffer,
            headers: Vec::new(),
            body: None,
            state: RequestState::Unissued,
            priority: 0.0,
            priority_fn: None,
            throttle: true,
            throttle_by_server: false,
            server_key: None,
            cancel_token: CancellationToken::new(),
            cancel_hook: None,
            retry_count: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    // =========================================================================
    // Builder
    // =========================================================================

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether the request goes through the priority heap.
    ///
    /// Unthrottled requests are started as soon as they are submitted.
    pub fn with_throttle(mut self, throttle: bool) -> Self {
        self.throttle = throttle;
        self
    }

    /// Whether the per-server concurrency cap applies.
    pub fn with_throttle_by_server(mut self, throttle_by_server: bool) -> Self {
        self.throttle_by_server = throttle_by_server;
        self
    }

    /// Sets a fixed priority. Overridden by a priority function, if any.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the function recomputing priority on every scheduler tick.
    pub fn with_priority_fn<F>(mut self, priority_fn: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.priority_fn = Some(Box::new(priority_fn));
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Sets a hook run once when the request is cancelled.
    pub fn with_cancel_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel_hook = Some(Box::new(hook));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn is_throttled(&self) -> bool {
        self.throttle
    }

    pub fn throttle_by_server(&self) -> bool {
        self.throttle_by_server
    }

    /// Normalized `host:port`, set once the request has been submitted.
    pub fn server_key(&self) -> Option<&str> {
        self.server_key.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Requests cancellation.
    ///
    /// The scheduler notices on its next tick; any in-flight transport call
    /// is aborted right away.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    // =========================================================================
    // Scheduler internals
    // =========================================================================

    /// Recomputes the priority from the priority function, if one is set.
    pub(crate) fn update_priority(&mut self) {
        if let Some(priority_fn) = &self.priority_fn {
            self.priority = priority_fn();
        }
    }

    pub(crate) fn take_cancel_hook(&mut self) -> Option<CancelHook> {
        self.cancel_hook.take()
    }

    /// Returns the request to Unissued with a fresh cancellation flag.
    pub(crate) fn reset(&mut self) {
        self.state = RequestState::Unissued;
        if self.cancel_token.is_cancelled() {
            self.cancel_token = CancellationToken::new();
        }
    }

    pub(crate) fn to_transport_request(&self) -> TransportRequest {
        TransportRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            response_type: self.response_type,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    /// `data:` and `blob:` URLs bypass scheduling.
    pub(crate) fn is_local_url(&self) -> bool {
        crate::transport::is_local_url(&self.url)
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("throttle", &self.throttle)
            .field("throttle_by_server", &self.throttle_by_server)
            .field("server_key", &self.server_key)
            .field("cancelled", &self.is_cancelled())
            .field("retry_count", &self.retry_count)
            .field("retry_limit", &self.retry_limit)
            .finish()
    }
}
