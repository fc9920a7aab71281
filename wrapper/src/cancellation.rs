//! Bridges the consumer-side ambient cancellation context
//! (`tokio_util::sync::CancellationToken`) into the ABI's pollable
//! `(fn pointer, user_data)` token: the engine polls a predicate between
//! awaits rather than having a signal injected into a running request.

use hfhub_xet_engine as engine;
use std::os::raw::c_void;
use tokio_util::sync::CancellationToken as TokioCancellationToken;

extern "C" fn poll_cancelled(user_data: *mut c_void) -> bool {
    if user_data.is_null() {
        return false;
    }
    let token = unsafe { &*(user_data as *const TokioCancellationToken) };
    token.is_cancelled()
}

/// Owns the `CancellationToken` for the lifetime of one ABI call. Built
/// just before the call, dropped immediately after it returns — the ABI
/// entry points block until the call completes, so the bridge never needs
/// to outlive the call that uses it.
pub(crate) struct CancellationBridge {
    // Keeps the `TokioCancellationToken` this bridge points at alive; the
    // ABI token below borrows its address for the duration of the call.
    _token: Box<TokioCancellationToken>,
    abi_token: engine::CancellationToken,
}

impl CancellationBridge {
    pub(crate) fn new(token: TokioCancellationToken) -> Self {
        let boxed = Box::new(token);
        let user_data = boxed.as_ref() as *const TokioCancellationToken as *mut c_void;
        let abi_token = engine::CancellationToken {
            callback: Some(poll_cancelled),
            user_data,
        };
        Self {
            _token: boxed,
            abi_token,
        }
    }

    pub(crate) fn as_raw(&self) -> *const engine::CancellationToken {
        &self.abi_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncancelled_token_never_reports_cancelled() {
        let token = TokioCancellationToken::new();
        let bridge = CancellationBridge::new(token);
        let raw = unsafe { &*bridge.as_raw() };
        assert!(!(raw.callback.unwrap())(raw.user_data));
    }

    #[test]
    fn cancelled_token_reports_cancelled() {
        let token = TokioCancellationToken::new();
        token.cancel();
        let bridge = CancellationBridge::new(token);
        let raw = unsafe { &*bridge.as_raw() };
        assert!((raw.callback.unwrap())(raw.user_data));
    }
}
