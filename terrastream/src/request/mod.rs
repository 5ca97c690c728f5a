//! Request scheduling.
//!
//! Every tile download goes through the [`RequestScheduler`], which bounds how
//! many requests are in flight globally and per server, and admits the most
//! urgent queued requests once per frame.
//!
//! # Architecture
//!
//! ```text
//! FetchRequest ──► RequestScheduler::request ──► BoundedPriorityHeap
//!                                                      │ tick()
//!                                                      ▼
//!                  RequestHandle ◄── completion ◄── Transport (tokio task)
//! ```
//!
//! The [`Resource`] front-end adds the retry protocol on top for async
//! callers.

mod error;
mod fetch;
mod heap;
mod retry;
mod scheduler;

pub use error::{FetchError, RequestError, SchedulerError};
pub use fetch::{CancelHook, FetchRequest, PriorityFn, RequestState, DEFAULT_RETRY_LIMIT};
pub use heap::{BoundedPriorityHeap, Comparator};
pub use retry::{check_and_reset, retry_on_error, run_ticker, Resource, RetryCallback, SharedScheduler};
pub use scheduler::{
    server_key, HandleStatus, RequestHandle, RequestId, RequestOutcome, RequestScheduler,
    RequestStatistics, Submission,
};
