//! Retry protocol and the async fetch entry point.
//!
//! [`Resource::fetch`] submits a request, waits for it, and on a transport
//! failure asks a [`RetryCallback`] whether to try again. Every accepted retry
//! counts against the request's `retry_limit`, so a request with a limit of
//! `n` invokes the callback at most `n` times. Cancellation is never retried.
//!
//! Completions are only delivered when the scheduler ticks, so async callers
//! need something driving [`RequestScheduler::tick`]: either the application's
//! own frame loop or [`run_ticker`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{FetchError, RequestError};
use super::fetch::FetchRequest;
use super::scheduler::{RequestScheduler, Submission};
use crate::transport::{BoxFuture, TransportError};

/// Scheduler shared between a frame loop and async fetchers.
///
/// Never hold the lock across an await point.
pub type SharedScheduler = Arc<Mutex<RequestScheduler>>;

/// Returns a request to `Unissued` so it can be submitted again.
///
/// Fails if the request is still Issued or Active; fetching a live request
/// twice is a caller bug.
pub fn check_and_reset(request: &mut FetchRequest) -> Result<(), FetchError> {
    if request.state().is_live() {
        return Err(FetchError::AlreadyIssued {
            url: request.url().to_string(),
        });
    }
    request.reset();
    Ok(())
}

/// Decides whether a failed request should be tried again.
pub trait RetryCallback: Send + Sync {
    fn retry<'a>(
        &'a self,
        request: &'a FetchRequest,
        error: &'a TransportError,
    ) -> BoxFuture<'a, bool>;
}

impl<F> RetryCallback for F
where
    F: Fn(&FetchRequest, &TransportError) -> bool + Send + Sync,
{
    fn retry<'a>(
        &'a self,
        request: &'a FetchRequest,
        error: &'a TransportError,
    ) -> BoxFuture<'a, bool> {
        let retry = self(request, error);
        Box::pin(std::future::ready(retry))
    }
}

/// Consults `callback` about a transport failure.
///
/// Returns false without calling back when there is no callback or the
/// request's retry budget is spent. Increments `retry_count` when the
/// callback agrees to retry.
pub async fn retry_on_error(
    request: &mut FetchRequest,
    error: &TransportError,
    callback: Option<&dyn RetryCallback>,
) -> bool {
    let Some(callback) = callback else {
        return false;
    };
    if request.retry_count() >= request.retry_limit() {
        return false;
    }

    let retry = callback.retry(request, error).await;
    if retry {
        request.retry_count += 1;
    }
    retry
}

/// Async fetch front-end over a [`SharedScheduler`].
#[derive(Clone)]
pub struct Resource {
    scheduler: SharedScheduler,
    retry_callback: Option<Arc<dyn RetryCallback>>,
}

impl Resource {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            scheduler,
            retry_callback: None,
        }
    }

    pub fn with_retry_callback(mut self, callback: Arc<dyn RetryCallback>) -> Self {
        self.retry_callback = Some(callback);
        self
    }

    /// Fetches `request`, retrying transport failures while the callback
    /// agrees and the retry budget lasts.
    ///
    /// Returns `Ok(None)` when the scheduler defers the request; the caller
    /// should try again on a later frame.
    pub async fn fetch(&self, mut request: FetchRequest) -> Result<Option<Bytes>, FetchError> {
        loop {
            check_and_reset(&mut request)?;

            let submission = self.scheduler.lock().request(request)?;
            let handle = match submission {
                Submission::Issued(handle) => handle,
                Submission::Deferred(_) => return Ok(None),
            };

            let outcome = handle.await.ok_or(FetchError::Cancelled)?;
            request = outcome.request;

            match outcome.result {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(RequestError::Cancelled) => return Err(FetchError::Cancelled),
                Err(RequestError::Transport(error)) => {
                    if retry_on_error(&mut request, &error, self.retry_callback.as_deref()).await {
                        debug!(
                            url = request.url(),
                            retry_count = request.retry_count(),
                            retry_limit = request.retry_limit(),
                            "Retrying request"
                        );
                        continue;
                    }
                    return Err(FetchError::Transport(error));
                }
            }
        }
    }
}

/// Ticks `scheduler` every `period` until `shutdown` is cancelled.
pub async fn run_ticker(scheduler: SharedScheduler, period: Duration, shutdown: CancellationToken) {
    info!(period_ms = period.as_millis() as u64, "Scheduler ticker starting");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Scheduler ticker shutting down");
                break;
            }

            _ = interval.tick() => {
                scheduler.lock().tick();
            }
        }
    }
}
