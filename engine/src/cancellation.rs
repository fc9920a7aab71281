//! Cooperative cancellation: a C-layout predicate polled by the async core
//! at safe points (before dispatching a task, between chunks inside a
//! task, and between retry attempts).

use std::os::raw::c_void;
use std::sync::Arc;

/// C-layout cancellation token. `callback` returns true once the
/// operation should stop; `user_data` is an opaque pointer passed back to
/// it unchanged on every poll.
///
/// # Safety
/// The pointee of `user_data` must remain valid and the callback must
/// remain callable for as long as the token is in use by any in-flight
/// ABI call that received it.
#[repr(C)]
pub struct CancellationToken {
    pub callback: Option<extern "C" fn(*mut c_void) -> bool>,
    pub user_data: *mut c_void,
}

/// Wrapper making the raw `user_data` pointer `Send + Sync` so the
/// resulting predicate can be cloned into concurrent download tasks. This
/// is sound only under the safety contract documented on
/// [`CancellationToken`]: the C caller promises the pointee stays valid
/// and the callback stays thread-safe for the duration of the operation.
struct RawTokenHandle {
    callback: extern "C" fn(*mut c_void) -> bool,
    user_data: usize,
}

unsafe impl Send for RawTokenHandle {}
unsafe impl Sync for RawTokenHandle {}

pub type CancelPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Convert a (possibly null) ABI token pointer into a pollable predicate.
/// A null pointer, or a token with no callback, means cancellation is
/// never possible.
///
/// # Safety
/// `token` must be either null or point to a live, readable
/// `CancellationToken`.
pub unsafe fn from_raw(token: *const CancellationToken) -> Option<CancelPredicate> {
    if token.is_null() {
        return None;
    }
    let token = unsafe { &*token };
    let callback = token.callback?;
    let handle = RawTokenHandle {
        callback,
        user_data: token.user_data as usize,
    };
    Some(Arc::new(move || (handle.callback)(handle.user_data as *mut c_void)))
}

pub fn is_cancelled(predicate: &Option<CancelPredicate>) -> bool {
    predicate.as_ref().map(|p| p()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    extern "C" fn always_true(_: *mut c_void) -> bool {
        true
    }

    extern "C" fn flag_check(user_data: *mut c_void) -> bool {
        let flag = unsafe { &*(user_data as *const AtomicBool) };
        flag.load(Ordering::SeqCst)
    }

    #[test]
    fn null_token_never_cancels() {
        let predicate = unsafe { from_raw(std::ptr::null()) };
        assert!(predicate.is_none());
        assert!(!is_cancelled(&predicate));
    }

    #[test]
    fn token_with_no_callback_never_cancels() {
        let token = CancellationToken {
            callback: None,
            user_data: std::ptr::null_mut(),
        };
        let predicate = unsafe { from_raw(&token as *const _) };
        assert!(predicate.is_none());
    }

    #[test]
    fn token_reflects_callback() {
        let token = CancellationToken {
            callback: Some(always_true),
            user_data: std::ptr::null_mut(),
        };
        let predicate = unsafe { from_raw(&token as *const _) };
        assert!(is_cancelled(&predicate));
    }

    #[test]
    fn token_reads_live_user_data() {
        let flag = AtomicBool::new(false);
        let token = CancellationToken {
            callback: Some(flag_check),
            user_data: &flag as *const AtomicBool as *mut c_void,
        };
        let predicate = unsafe { from_raw(&token as *const _) };
        assert!(!is_cancelled(&predicate));
        flag.store(true, Ordering::SeqCst);
        assert!(is_cancelled(&predicate));
    }
}
