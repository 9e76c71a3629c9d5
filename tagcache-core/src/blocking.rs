//! # Blocking Bridge
//!
//! Drive a future to completion on the calling thread.
//!
//! Synchronous cache reads use this when they meet a value that is still
//! being produced by an asynchronous factory. Do not call it from inside an
//! async task: it parks the current thread until the future resolves.

use std::future::Future;

/// Block the current thread until `future` completes and return its output.
pub fn wait<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}
