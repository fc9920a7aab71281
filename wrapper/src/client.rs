//! The typed, high-level client. Talks to the engine exclusively through
//! its `extern "C"` surface: every call here marshals owned Rust values
//! into borrowed C pointers, invokes the ABI entry point, and converts the
//! result (or frees the ABI-allocated memory) before returning.

use hfhub_xet_engine as engine;
use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use std::ptr;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken as TokioCancellationToken;

use crate::cancellation::CancellationBridge;
use crate::config::ClientConfig;
use crate::error::{check, Result, XetClientError};
use crate::progress::{self, ProgressState, ProgressUpdate};
use crate::types::{DownloadRequest, FileInfo, SnapshotRequest};

/// A typed client wrapping one native `XetClient` handle.
///
/// `Client` is `Send + Sync`: the underlying ABI entry points are
/// documented safe to call concurrently from multiple threads as long as
/// the handle is not being destroyed at the same time, which `close`/
/// `Drop` guarantee by taking `&mut self`/consuming the value.
pub struct Client {
    handle: *mut engine::XetClient,
    progress_slot: Mutex<Option<*mut c_void>>,
}

unsafe impl Send for Client {}
unsafe impl Sync for Client {}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| {
        XetClientError::invalid_config(format!("value contains an interior NUL byte: {value:?}"))
    })
}

fn opt_cstring(value: Option<&str>) -> Result<Option<CString>> {
    value.map(cstring).transpose()
}

fn opt_ptr(value: &Option<CString>) -> *const std::os::raw::c_char {
    value.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

impl Client {
    /// Validate `config` and construct a new client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = cstring(&config.endpoint)?;
        let token = opt_cstring(config.token.as_deref())?;
        let cache_dir = opt_cstring(config.cache_dir.as_deref())?;

        if let Some(level) = &config.log_level {
            // The engine reads `RUST_LOG`/`XET_LOG_LEVEL` once, at first
            // construction; forward the wrapper's requested level into the
            // same variable so both are consistent with `logging.rs`.
            if std::env::var("RUST_LOG").is_err() {
                std::env::set_var("XET_LOG_LEVEL", level);
            }
        }

        let raw_config = engine::XetConfig {
            endpoint: endpoint.as_ptr(),
            token: opt_ptr(&token),
            cache_dir: opt_ptr(&cache_dir),
            max_concurrent_downloads: config.max_concurrent_downloads,
            enable_dedup: config.enable_dedup,
        };

        let handle = unsafe { engine::xet_client_new(&raw_config as *const engine::XetConfig) };
        if handle.is_null() {
            tracing::warn!(endpoint = %config.endpoint, "client construction failed");
            return Err(XetClientError::invalid_config(
                "client construction failed; see logs for details",
            ));
        }

        tracing::debug!(endpoint = %config.endpoint, "client constructed");
        Ok(Self {
            handle,
            progress_slot: Mutex::new(None),
        })
    }

    /// Build a client from the Hub-compatible environment variables (see
    /// [`ClientConfig::from_env`]).
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Idempotently release the native handle. Safe to call more than
    /// once; subsequent calls are no-ops. Called automatically by `Drop`
    /// if not called explicitly.
    pub fn close(&mut self) {
        if self.handle.is_null() {
            return;
        }
        self.detach_progress_locked();
        unsafe { engine::xet_client_free(self.handle) };
        self.handle = ptr::null_mut();
        tracing::debug!("client closed");
    }

    fn detach_progress_locked(&self) {
        let mut slot = self.progress_slot.lock().unwrap();
        if let Some(previous) = slot.take() {
            unsafe {
                engine::xet_client_set_progress_callback(self.handle, None, ptr::null_mut(), 0);
                ProgressState::reclaim(previous);
            }
        }
    }

    /// Install a progress handler, replacing (and freeing) any previously
    /// installed one. `throttle` is clamped up to the engine's 200ms floor.
    pub fn set_progress_handler<F>(&self, handler: F, throttle: Duration) -> Result<()>
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.detach_progress_locked();

        let state = Box::new(ProgressState::new(handler));
        let user_data = state.into_user_data();
        let throttle_ms = throttle.max(progress::MIN_THROTTLE).as_millis() as u32;

        let err = unsafe {
            engine::xet_client_set_progress_callback(
                self.handle,
                Some(progress::trampoline),
                user_data,
                throttle_ms,
            )
        };
        if let Err(e) = unsafe { check(err) } {
            unsafe { ProgressState::reclaim(user_data) };
            return Err(e);
        }

        *self.progress_slot.lock().unwrap() = Some(user_data);
        Ok(())
    }

    /// Install the pre-built console renderer: one carriage-return
    /// terminated status line per throttle tick, with a trailing newline
    /// once the download finishes.
    pub fn enable_console_progress(&self, label: impl Into<String>, throttle: Duration) -> Result<()> {
        self.set_progress_handler(progress::console_handler(label.into()), throttle)
    }

    /// Detach any installed progress handler.
    pub fn disable_progress(&self) {
        self.detach_progress_locked();
    }

    /// List the files in `repo_id` at `revision` (default `main`).
    pub fn list_files(&self, repo_id: &str, revision: Option<&str>) -> Result<Vec<FileInfo>> {
        let repo_id = cstring(repo_id)?;
        let revision = opt_cstring(revision)?;

        let mut out_files: *mut engine::XetFileList = ptr::null_mut();
        let err = unsafe {
            engine::xet_list_files(
                self.handle,
                repo_id.as_ptr(),
                opt_ptr(&revision),
                &mut out_files as *mut *mut engine::XetFileList,
            )
        };
        unsafe { check(err)? };

        let list = unsafe { &*out_files };
        let raw_files = unsafe { std::slice::from_raw_parts(list.files, list.count) };
        let files = raw_files
            .iter()
            .map(|f| FileInfo {
                path: unsafe { cstr_owned(f.path) },
                hash: unsafe { cstr_owned(f.hash) },
                size: f.size,
            })
            .collect();

        unsafe { engine::xet_free_file_list(out_files) };
        Ok(files)
    }

    /// Download a single file, with no cancellation possible.
    pub fn download_file(&self, request: &DownloadRequest) -> Result<String> {
        self.download_file_inner(request, None)
    }

    /// Download a single file, cancellable through `context`.
    pub fn download_file_with_context(
        &self,
        context: &TokioCancellationToken,
        request: &DownloadRequest,
    ) -> Result<String> {
        self.download_file_inner(request, Some(context.clone()))
    }

    fn download_file_inner(
        &self,
        request: &DownloadRequest,
        context: Option<TokioCancellationToken>,
    ) -> Result<String> {
        let repo_id = cstring(&request.repo_id)?;
        let repo_type = opt_cstring(request.repo_type.as_deref())?;
        let revision = opt_cstring(request.revision.as_deref())?;
        let filename = cstring(&request.filename)?;
        let local_dir = opt_cstring(request.local_dir.as_deref())?;

        let raw_request = engine::XetDownloadRequest {
            repo_id: repo_id.as_ptr(),
            repo_type: opt_ptr(&repo_type),
            revision: opt_ptr(&revision),
            filename: filename.as_ptr(),
            local_dir: opt_ptr(&local_dir),
        };

        let bridge = context.map(CancellationBridge::new);
        let cancel_ptr = bridge.as_ref().map_or(ptr::null(), CancellationBridge::as_raw);

        let mut out_path: *mut std::os::raw::c_char = ptr::null_mut();
        let err = unsafe {
            engine::xet_download_file(
                self.handle,
                &raw_request as *const engine::XetDownloadRequest,
                cancel_ptr,
                &mut out_path as *mut *mut std::os::raw::c_char,
            )
        };
        unsafe { check(err)? };

        let path = unsafe { cstr_owned(out_path) };
        unsafe { engine::xet_free_string(out_path) };
        Ok(path)
    }

    /// Download an entire repository snapshot, with no cancellation
    /// possible.
    pub fn download_snapshot(&self, request: &SnapshotRequest) -> Result<String> {
        self.download_snapshot_inner(request, None)
    }

    /// Download an entire repository snapshot, cancellable through
    /// `context`.
    pub fn download_snapshot_with_context(
        &self,
        context: &TokioCancellationToken,
        request: &SnapshotRequest,
    ) -> Result<String> {
        self.download_snapshot_inner(request, Some(context.clone()))
    }

    fn download_snapshot_inner(
        &self,
        request: &SnapshotRequest,
        context: Option<TokioCancellationToken>,
    ) -> Result<String> {
        let repo_id = cstring(&request.repo_id)?;
        let repo_type = opt_cstring(request.repo_type.as_deref())?;
        let revision = opt_cstring(request.revision.as_deref())?;
        let local_dir = cstring(&request.local_dir)?;

        let bridge = context.map(CancellationBridge::new);
        let cancel_ptr = bridge.as_ref().map_or(ptr::null(), CancellationBridge::as_raw);

        let mut out_path: *mut std::os::raw::c_char = ptr::null_mut();
        let err = unsafe {
            engine::xet_download_snapshot(
                self.handle,
                repo_id.as_ptr(),
                opt_ptr(&repo_type),
                opt_ptr(&revision),
                local_dir.as_ptr(),
                cancel_ptr,
                &mut out_path as *mut *mut std::os::raw::c_char,
            )
        };
        unsafe { check(err)? };

        let path = unsafe { cstr_owned(out_path) };
        unsafe { engine::xet_free_string(out_path) };
        Ok(path)
    }
}

unsafe fn cstr_owned(ptr: *mut std::os::raw::c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
