//! C ABI surface: opaque client handle, value-layout request/response
//! structs, the error object, and the memory-management entry points that
//! govern cross-boundary ownership.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;

use crate::cancellation::{self, CancellationToken};
use crate::error::{XetError, XetErrorCode};
use crate::get_runtime;
use crate::hf_adapter::HfAdapter;
use crate::progress::{ProgressHandler, XetProgressCallback};
use crate::token_refresh::{TokenRefreshHook, XetTokenRefreshCallback};

/// Opaque client handle. Shared internally so read-only calls may run
/// concurrently; destruction drops the last strong reference.
pub struct XetClient {
    adapter: HfAdapter,
    progress: ProgressHandler,
}

#[repr(C)]
pub struct XetConfig {
    pub endpoint: *const c_char,
    pub token: *const c_char,
    pub cache_dir: *const c_char,
    pub max_concurrent_downloads: u32,
    pub enable_dedup: bool,
}

#[repr(C)]
pub struct XetDownloadRequest {
    pub repo_id: *const c_char,
    pub repo_type: *const c_char,
    pub revision: *const c_char,
    pub filename: *const c_char,
    pub local_dir: *const c_char,
}

#[repr(C)]
pub struct XetFileInfoC {
    pub path: *mut c_char,
    pub hash: *mut c_char,
    pub size: u64,
}

#[repr(C)]
pub struct XetFileList {
    pub files: *mut XetFileInfoC,
    pub count: usize,
}

unsafe fn c_str_to_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        CStr::from_ptr(s).to_str().ok().map(|s| s.to_string())
    }
}

/// Distinguishes "pointer was null" from "pointer was non-null but not
/// valid UTF-8" so the caller gets InvalidConfig rather than silently
/// treating malformed input as absent.
unsafe fn c_str_to_opt_result(s: *const c_char) -> Result<Option<String>, ()> {
    if s.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(s).to_str().map(|s| Some(s.to_string())).map_err(|_| ())
}

fn invalid_config(message: &str) -> *mut XetError {
    XetError::new(XetErrorCode::InvalidConfig, message.to_string(), None)
}

#[no_mangle]
pub extern "C" fn xet_client_new(config: *const XetConfig) -> *mut XetClient {
    if config.is_null() {
        return ptr::null_mut();
    }

    unsafe {
        crate::logging::init_logging();

        let raw = &*config;

        let endpoint = match c_str_to_opt_result(raw.endpoint) {
            Ok(endpoint) => endpoint.unwrap_or_else(|| crate::config::Config::default().endpoint),
            Err(()) => return ptr::null_mut(),
        };
        let token = match c_str_to_opt_result(raw.token) {
            Ok(token) => token,
            Err(()) => return ptr::null_mut(),
        };
        let cache_dir = match c_str_to_opt_result(raw.cache_dir) {
            Ok(cache_dir) => cache_dir,
            Err(()) => return ptr::null_mut(),
        };

        let config = match (crate::config::Config {
            endpoint,
            token,
            cache_dir,
            max_concurrent_downloads: raw.max_concurrent_downloads as usize,
            enable_dedup: raw.enable_dedup,
            log_level: None,
        })
        .validate()
        {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("invalid client config: {err:?}");
                return ptr::null_mut();
            }
        };

        match HfAdapter::new(
            config.endpoint,
            config.token,
            config.cache_dir,
            config.max_concurrent_downloads,
            config.enable_dedup,
        ) {
            Ok(adapter) => Box::into_raw(Box::new(XetClient {
                adapter,
                progress: ProgressHandler::default(),
            })),
            Err(err) => {
                tracing::warn!("client construction failed: {err:?}");
                ptr::null_mut()
            }
        }
    }
}

/// # Safety
/// `client` must be either null or a pointer previously returned by
/// [`xet_client_new`] that has not already been freed. After this call
/// the pointer must not be used again.
#[no_mangle]
pub unsafe extern "C" fn xet_client_free(client: *mut XetClient) {
    if !client.is_null() {
        let _ = Box::from_raw(client);
    }
}

/// Install (or detach, with `callback = None`) the client's single
/// progress handler. Must be serialized against other calls on the same
/// client by the caller.
///
/// # Safety
/// `client` must be a live pointer from [`xet_client_new`].
#[no_mangle]
pub unsafe extern "C" fn xet_client_set_progress_callback(
    client: *mut XetClient,
    callback: Option<XetProgressCallback>,
    user_data: *mut c_void,
    throttle_ms: u32,
) -> *mut XetError {
    if client.is_null() {
        return invalid_config("null client");
    }
    let client = &*client;
    match callback {
        Some(callback) => client.progress.configure(Some(callback), user_data, throttle_ms),
        None => client.progress.detach(),
    }
    ptr::null_mut()
}

/// Install (or clear, with `callback = None`) a hook the engine calls to
/// obtain a fresh bearer token for plain HTTPS requests. Does not affect
/// XET CAS token refresh, which always goes through its own route.
///
/// # Safety
/// `client` must be a live pointer from [`xet_client_new`]; `callback`,
/// if present, must remain safe to call with `user_data` for as long as
/// it stays installed.
#[no_mangle]
pub unsafe extern "C" fn xet_client_set_token_refresh_hook(
    client: *mut XetClient,
    callback: Option<XetTokenRefreshCallback>,
    user_data: *mut c_void,
) -> *mut XetError {
    if client.is_null() {
        return invalid_config("null client");
    }
    let client = &*client;
    let hook = callback.map(|callback| TokenRefreshHook::new(callback, user_data));
    let runtime = get_runtime();
    runtime.block_on(client.adapter.set_token_refresh_hook(hook));
    ptr::null_mut()
}

/// # Safety
/// `client`, `repo_id`, and `out_files` must satisfy the documented
/// pointer contracts: `client` live, `repo_id` a readable NUL-terminated
/// string, `out_files` a writable out-parameter.
#[no_mangle]
pub unsafe extern "C" fn xet_list_files(
    client: *mut XetClient,
    repo_id: *const c_char,
    revision: *const c_char,
    out_files: *mut *mut XetFileList,
) -> *mut XetError {
    if client.is_null() || repo_id.is_null() || out_files.is_null() {
        return invalid_config("null client, repo_id, or out_files");
    }

    let client = &*client;
    let repo_id = match c_str_to_string(repo_id) {
        Some(s) => s,
        None => return invalid_config("repo_id is not valid UTF-8"),
    };
    let revision = c_str_to_string(revision);

    let runtime = get_runtime();
    let result = runtime.block_on(client.adapter.list_files(&repo_id, revision.as_deref()));

    match result {
        Ok(files) => {
            let count = files.len();
            let mut c_files = Vec::with_capacity(count);
            for file in files {
                c_files.push(XetFileInfoC {
                    path: CString::new(file.path).unwrap_or_default().into_raw(),
                    hash: CString::new(file.hash).unwrap_or_default().into_raw(),
                    size: file.size,
                });
            }

            let mut c_files = c_files.into_boxed_slice();
            let file_list = Box::new(XetFileList {
                files: c_files.as_mut_ptr(),
                count,
            });
            std::mem::forget(c_files);

            *out_files = Box::into_raw(file_list);
            ptr::null_mut()
        }
        Err(e) => XetError::from_anyhow(e),
    }
}

/// # Safety
/// `client`, `request`, and `out_path` must satisfy the documented
/// pointer contracts; `cancel_token`, if non-null, must point to a live
/// `CancellationToken` for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn xet_download_file(
    client: *mut XetClient,
    request: *const XetDownloadRequest,
    cancel_token: *const CancellationToken,
    out_path: *mut *mut c_char,
) -> *mut XetError {
    if client.is_null() || request.is_null() || out_path.is_null() {
        return invalid_config("null client, request, or out_path");
    }

    let client = &*client;
    let request = &*request;

    let repo_id = match c_str_to_string(request.repo_id) {
        Some(s) if !s.is_empty() => s,
        _ => return invalid_config("repo_id is required and must be valid UTF-8"),
    };
    let filename = match c_str_to_string(request.filename) {
        Some(s) if !s.is_empty() => s,
        _ => return invalid_config("filename is required and must be valid UTF-8"),
    };
    let repo_type = c_str_to_string(request.repo_type);
    let revision = c_str_to_string(request.revision);
    let local_dir = c_str_to_string(request.local_dir);
    let cancel_check = cancellation::from_raw(cancel_token);
    let progress = client.progress.new_operation();

    let runtime = get_runtime();
    let result = runtime.block_on(client.adapter.download_file_with_cancel(
        &repo_id,
        &filename,
        repo_type.as_deref(),
        revision.as_deref(),
        local_dir.as_deref(),
        cancel_check,
        progress,
    ));

    match result {
        Ok(path) => {
            *out_path = CString::new(path).unwrap_or_default().into_raw();
            ptr::null_mut()
        }
        Err(e) => XetError::from_anyhow(e),
    }
}

/// # Safety
/// `client`, `repo_id`, `local_dir`, and `out_path` must satisfy the
/// documented pointer contracts; `cancel_token`, if non-null, must point
/// to a live `CancellationToken` for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn xet_download_snapshot(
    client: *mut XetClient,
    repo_id: *const c_char,
    repo_type: *const c_char,
    revision: *const c_char,
    local_dir: *const c_char,
    cancel_token: *const CancellationToken,
    out_path: *mut *mut c_char,
) -> *mut XetError {
    if client.is_null() || repo_id.is_null() || local_dir.is_null() || out_path.is_null() {
        return invalid_config("null client, repo_id, local_dir, or out_path");
    }

    let client = &*client;
    let repo_id = match c_str_to_string(repo_id) {
        Some(s) if !s.is_empty() => s,
        _ => return invalid_config("repo_id is required and must be valid UTF-8"),
    };
    let repo_type = c_str_to_string(repo_type);
    let revision = c_str_to_string(revision);
    let local_dir = match c_str_to_string(local_dir) {
        Some(s) if !s.is_empty() => s,
        _ => return invalid_config("local_dir is required and must be valid UTF-8"),
    };
    let cancel_check = cancellation::from_raw(cancel_token);
    let progress = client.progress.new_operation();

    let runtime = get_runtime();
    let result = runtime.block_on(client.adapter.download_snapshot(
        &repo_id,
        repo_type.as_deref(),
        revision.as_deref(),
        &local_dir,
        None,
        None,
        cancel_check,
        progress,
    ));

    match result {
        Ok(path) => {
            *out_path = CString::new(path).unwrap_or_default().into_raw();
            ptr::null_mut()
        }
        Err(e) => XetError::from_anyhow(e),
    }
}

/// # Safety
/// `list`, if non-null, must be a pointer previously returned through
/// `xet_list_files`'s `out_files` parameter, not already freed.
#[no_mangle]
pub unsafe extern "C" fn xet_free_file_list(list: *mut XetFileList) {
    if list.is_null() {
        return;
    }
    let list = Box::from_raw(list);
    let files = Vec::from_raw_parts(list.files, list.count, list.count);
    for file in files {
        if !file.path.is_null() {
            let _ = CString::from_raw(file.path);
        }
        if !file.hash.is_null() {
            let _ = CString::from_raw(file.hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn null_client_new_returns_null() {
        assert!(xet_client_new(ptr::null()).is_null());
    }

    #[test]
    fn null_request_pointers_yield_invalid_config() {
        let mut out_path: *mut c_char = ptr::null_mut();
        let err = unsafe { xet_download_file(ptr::null_mut(), ptr::null(), ptr::null(), &mut out_path) };
        assert!(!err.is_null());
        unsafe {
            assert_eq!((*err).code, XetErrorCode::InvalidConfig as i32);
            crate::error::xet_free_error(err);
        }
    }

    #[test]
    fn free_functions_are_null_safe() {
        unsafe {
            xet_client_free(ptr::null_mut());
            xet_free_file_list(ptr::null_mut());
        }
    }
}
