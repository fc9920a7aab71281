//! Optional consumer-driven refresh hook for the HF bearer token.
//!
//! This is distinct from the XET CAS token refresh in
//! [`crate::xet_integration::XetTokenManager`], which always refreshes
//! through the Hub's own refresh route. This hook lets a consumer supply
//! a fresh bearer token for plain HTTPS calls (e.g. after its own auth
//! token rotates mid-snapshot); it is optional and, when absent, the
//! client simply keeps using the token it was constructed with.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::sync::Arc;
use utils::auth::{TokenInfo, TokenRefresher};
use utils::errors::AuthError;

/// Callback signature for `client_set_token_refresh_hook`. On success the
/// callback writes a borrowed, NUL-terminated token string through
/// `out_token` (valid only for the duration of this call — the engine
/// copies it immediately) and the token's unix-epoch expiry through
/// `out_expiry`, then returns `true`. Returning `false` means "no fresh
/// token available".
pub type XetTokenRefreshCallback = extern "C" fn(
    user_data: *mut c_void,
    out_token: *mut *const c_char,
    out_expiry: *mut u64,
) -> bool;

struct RawHook {
    callback: XetTokenRefreshCallback,
    user_data: usize,
}

unsafe impl Send for RawHook {}
unsafe impl Sync for RawHook {}

/// A consumer-installed token refresh hook, reachable from the async core
/// as a plain `Fn`.
pub struct TokenRefreshHook {
    raw: RawHook,
}

impl TokenRefreshHook {
    /// # Safety
    /// `callback` must be safe to call with `user_data` from any thread
    /// for as long as this hook is installed.
    pub unsafe fn new(callback: XetTokenRefreshCallback, user_data: *mut c_void) -> Self {
        Self {
            raw: RawHook {
                callback,
                user_data: user_data as usize,
            },
        }
    }

    pub fn call(&self) -> Result<(String, u64)> {
        let mut out_token: *const c_char = std::ptr::null();
        let mut out_expiry: u64 = 0;
        let ok = (self.raw.callback)(
            self.raw.user_data as *mut c_void,
            &mut out_token as *mut *const c_char,
            &mut out_expiry as *mut u64,
        );
        if !ok || out_token.is_null() {
            return Err(anyhow!("token refresh hook declined to provide a token"));
        }
        let token = unsafe { CStr::from_ptr(out_token) }
            .to_str()
            .map_err(|_| anyhow!("token refresh hook returned non-UTF-8 token"))?
            .to_string();
        Ok((token, out_expiry))
    }
}

/// Adapts any `Fn() -> Result<(String, u64)>` (including
/// [`TokenRefreshHook::call`]) to xet-core's `TokenRefresher` trait, used
/// when wiring a consumer-level refresher into the CAS auth config.
pub struct XetTokenRefresher {
    refresh_fn: Arc<dyn Fn() -> Result<(String, u64)> + Send + Sync>,
}

impl XetTokenRefresher {
    pub fn new(refresh_fn: Arc<dyn Fn() -> Result<(String, u64)> + Send + Sync>) -> Self {
        Self { refresh_fn }
    }
}

#[async_trait]
impl TokenRefresher for XetTokenRefresher {
    async fn refresh(&self) -> Result<TokenInfo, AuthError> {
        (self.refresh_fn)().map_err(|e| AuthError::TokenRefreshFailure(e.to_string()))
    }
}
