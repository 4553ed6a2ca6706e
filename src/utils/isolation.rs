//! Panic isolation for background handlers.
//!
//! Handlers run under `catch_unwind` both while the future is being built
//! and while it is polled, so a panicking handler becomes an ordinary value
//! instead of tearing down the task that drives it.
//!
//! `catch_unwind` does not catch aborts; the crate must not be built with
//! `panic = "abort"`.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;

/// Human-readable message from a panic payload.
pub fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}

/// Build and await the future returned by `f`, converting a panic at either
/// stage into `Err(message)`.
pub async fn run_isolated<F, Fut, T>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let future = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(future) => future,
        Err(payload) => return Err(extract_panic_message(payload.as_ref())),
    };

    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| extract_panic_message(payload.as_ref()))
}
