//! Typed error surface for the wrapper, built from the ABI's `XetError`.
//!
//! The wrapper never re-parses the engine's message strings: it reads the
//! taxonomy code and the owned message/details strings out of the ABI error
//! exactly once, frees the ABI object, and hands the caller a plain
//! `thiserror` enum. Grounded on `gglib-hf`'s `HfError` for the shape of a
//! typed, per-variant client error, since the engine crate below it has no
//! public-facing Rust error type of its own (only the C `XetError` struct).

use hfhub_xet_engine as engine;
use std::ffi::CStr;
use thiserror::Error;

/// Mirrors [`engine::XetErrorCode`] as a safe, owned enum for the wrapper's
/// public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidConfig,
    AuthFailed,
    NetworkError,
    NotFound,
    PermissionDenied,
    ChecksumMismatch,
    Cancelled,
    IoError,
    Unknown,
}

impl ErrorCode {
    fn from_raw(code: i32) -> Self {
        match code {
            1 => Self::InvalidConfig,
            2 => Self::AuthFailed,
            3 => Self::NetworkError,
            4 => Self::NotFound,
            5 => Self::PermissionDenied,
            6 => Self::ChecksumMismatch,
            7 => Self::Cancelled,
            8 => Self::IoError,
            _ => Self::Unknown,
        }
    }
}

/// A typed, owned error surfaced by any fallible wrapper call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct XetClientError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl XetClientError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidConfig,
            message: message.into(),
            details: None,
        }
    }

    /// Consume an ABI error pointer exactly once: copy its fields into an
    /// owned `XetClientError`, then free it via `xet_free_error`.
    ///
    /// # Safety
    /// `err` must be a non-null pointer returned by one of the engine's
    /// ABI entry points, not previously freed.
    pub(crate) unsafe fn from_raw(err: *mut engine::XetError) -> Self {
        let raw = &*err;
        let code = ErrorCode::from_raw(raw.code);
        let message = cstr_to_string(raw.message).unwrap_or_else(|| "unknown error".to_string());
        let details = cstr_to_string(raw.details);
        engine::xet_free_error(err);
        Self {
            code,
            message,
            details,
        }
    }
}

unsafe fn cstr_to_string(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

pub type Result<T> = std::result::Result<T, XetClientError>;

/// Maps an ABI call's `*mut XetError` return value into `Result<(), _>`,
/// consuming (and freeing) the error pointer if non-null.
///
/// # Safety
/// `err` must be either null or a live, unfreed pointer from an ABI call.
pub(crate) unsafe fn check(err: *mut engine::XetError) -> Result<()> {
    if err.is_null() {
        Ok(())
    } else {
        Err(XetClientError::from_raw(err))
    }
}
