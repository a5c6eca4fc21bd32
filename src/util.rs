use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::Future;
use futures::FutureExt;
use tracing::error;

use crate::{
    error::{CrashId, RUNTIME_PANIC},
    AppError, AppResult,
};

fn panic_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn app_error_from_panic(payload: Box<dyn Any + Send>) -> AppError {
    let message = panic_payload(payload.as_ref());
    let crash_id = CrashId::new();

    error!(
        target: "vetclinic",
        event = "panic_caught",
        crash_id = %crash_id,
        message = message.as_str()
    );
    let mut error = AppError::new(RUNTIME_PANIC, message);
    error.set_crash_id(crash_id);
    error
}

/// Run a backend future, turning a panic anywhere inside it into an [`AppError`].
#[allow(clippy::result_large_err)]
pub async fn dispatch_async_app_result<F, Fut, T>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(fut) => fut,
        Err(payload) => return Err(app_error_from_panic(payload)),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}
