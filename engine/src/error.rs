use std::ffi::CString;
use std::fmt;
use std::os::raw::c_char;

#[repr(C)]
pub struct XetError {
    pub code: i32,
    pub message: *mut c_char,
    pub details: *mut c_char,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XetErrorCode {
    Ok = 0,
    InvalidConfig = 1,
    AuthFailed = 2,
    NetworkError = 3,
    NotFound = 4,
    PermissionDenied = 5,
    ChecksumMismatch = 6,
    Cancelled = 7,
    IoError = 8,
    Unknown = 99,
}

/// Marker error carrying a specific taxonomy classification through
/// `anyhow`'s error chain. The async core attaches one of these whenever
/// it can name the failure precisely; anything that reaches the ABI
/// boundary without one of these in its chain is classified `Unknown`
/// (or inferred from a wrapped `io::Error`/`reqwest::Error`, see
/// [`classify_fallback`]).
#[derive(Debug, Clone)]
pub struct Classified {
    pub code: XetErrorCode,
    pub message: String,
}

impl fmt::Display for Classified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Classified {}

impl Classified {
    pub fn new(code: XetErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> anyhow::Error {
        anyhow::Error::new(Self::new(XetErrorCode::Cancelled, "operation cancelled"))
    }

    pub fn not_found(what: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::new(XetErrorCode::NotFound, what.into()))
    }

    pub fn permission_denied(what: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::new(XetErrorCode::PermissionDenied, what.into()))
    }

    pub fn auth_failed(what: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::new(XetErrorCode::AuthFailed, what.into()))
    }

    pub fn invalid_config(what: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::new(XetErrorCode::InvalidConfig, what.into()))
    }

    pub fn checksum_mismatch(what: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Self::new(XetErrorCode::ChecksumMismatch, what.into()))
    }
}

/// Classify an HTTP status code the way `hf_adapter` needs it. 429 is left
/// to the retry path (it is not a final classification until the retry
/// budget is exhausted) but is still reported as `NetworkError` if it
/// surfaces.
pub fn code_for_status(status: reqwest::StatusCode) -> Option<XetErrorCode> {
    match status.as_u16() {
        401 => Some(XetErrorCode::AuthFailed),
        403 => Some(XetErrorCode::PermissionDenied),
        404 | 410 => Some(XetErrorCode::NotFound),
        429 => Some(XetErrorCode::NetworkError),
        _ => None,
    }
}

impl XetError {
    pub fn new(code: XetErrorCode, message: String, details: Option<String>) -> *mut XetError {
        let error = Box::new(XetError {
            code: code as i32,
            message: CString::new(message)
                .unwrap_or_else(|_| CString::new("invalid error message").unwrap())
                .into_raw(),
            details: details
                .and_then(|d| CString::new(d).ok())
                .map(|s| s.into_raw())
                .unwrap_or(std::ptr::null_mut()),
        });
        Box::into_raw(error)
    }

    /// Map an `anyhow::Error` produced by the async core into the ABI
    /// taxonomy. A [`Classified`] anywhere in the error's source chain
    /// wins; otherwise the error is classified from its underlying type,
    /// falling back to `Unknown` with the full debug chain preserved in
    /// `details`.
    pub fn from_anyhow(err: anyhow::Error) -> *mut XetError {
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<Classified>())
            .map(|c| c.code)
            .unwrap_or_else(|| classify_fallback(&err));

        let message = format!("{err}");
        let details = format!("{err:?}");
        Self::new(code, message, Some(details))
    }
}

fn classify_fallback(err: &anyhow::Error) -> XetErrorCode {
    if err
        .chain()
        .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
    {
        return XetErrorCode::IoError;
    }
    if err
        .chain()
        .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some())
    {
        return XetErrorCode::NetworkError;
    }
    XetErrorCode::Unknown
}

/// Free an error returned by XET functions.
///
/// # Safety
///
/// Caller must ensure that:
/// - `err` is either null or a valid pointer returned by an XET function
/// - `err` is not used after calling this function
/// - this is called at most once per pointer
#[no_mangle]
pub unsafe extern "C" fn xet_free_error(err: *mut XetError) {
    if !err.is_null() {
        unsafe {
            let error = Box::from_raw(err);
            if !error.message.is_null() {
                let _ = CString::from_raw(error.message);
            }
            if !error.details.is_null() {
                let _ = CString::from_raw(error.details);
            }
        }
    }
}

/// Free a string returned by XET functions.
///
/// # Safety
///
/// Caller must ensure that:
/// - `s` is either null or a valid pointer returned by an XET function
/// - `s` is not used after calling this function
/// - this is called at most once per pointer
#[no_mangle]
pub unsafe extern "C" fn xet_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}
