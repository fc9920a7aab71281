//! Progress-handler trampoline and the pre-built console renderer.
//!
//! The consumer-supplied closure is boxed behind a raw pointer installed as
//! the ABI callback's `user_data` — the same callback-trampoline pattern
//! the engine crate uses internally: the wrapper owns the boxed state,
//! install/uninstall is idempotent, and replacing or detaching it frees
//! the previous box.

use hfhub_xet_engine as engine;
use std::ffi::CStr;
use std::io::Write;
use std::os::raw::c_void;
use std::time::Duration;

/// A phase of one operation's progress, owned and safe to retain past the
/// callback invocation (unlike the borrowed ABI snapshot it is built from).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scanning,
    Downloading,
    Finalizing,
}

impl Phase {
    fn from_raw(phase: i32) -> Self {
        match phase {
            0 => Self::Scanning,
            1 => Self::Downloading,
            _ => Self::Finalizing,
        }
    }
}

/// Owned snapshot of one progress update, handed to the installed handler.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub total_files: u32,
    pub completed_files: u32,
    pub current_file: String,
    pub current_file_completed_bytes: u64,
    pub current_file_total_bytes: u64,
}

impl ProgressUpdate {
    /// # Safety
    /// `raw` must point at a live, fully initialized `XetProgressUpdate`
    /// for the duration of this call.
    unsafe fn from_raw(raw: &engine::XetProgressUpdate) -> Self {
        let current_file = if raw.current_file.is_null() {
            String::new()
        } else {
            CStr::from_ptr(raw.current_file).to_string_lossy().into_owned()
        };
        Self {
            phase: Phase::from_raw(raw.phase),
            total_bytes: raw.total_bytes,
            completed_bytes: raw.completed_bytes,
            total_files: raw.total_files,
            completed_files: raw.completed_files,
            current_file,
            current_file_completed_bytes: raw.current_file_completed_bytes,
            current_file_total_bytes: raw.current_file_total_bytes,
        }
    }

    fn is_done(&self) -> bool {
        self.phase == Phase::Finalizing && self.completed_bytes >= self.total_bytes
    }
}

/// Boxed state installed as the ABI callback's `user_data`. Owned by
/// [`crate::Client`] for as long as this handler stays installed.
pub(crate) struct ProgressState {
    handler: Box<dyn Fn(ProgressUpdate) + Send + Sync>,
}

impl ProgressState {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Leak this state behind a raw pointer suitable for installation as
    /// `user_data`. The caller (`Client`) is responsible for reclaiming it
    /// with [`ProgressState::reclaim`] exactly once.
    pub(crate) fn into_user_data(self: Box<Self>) -> *mut c_void {
        Box::into_raw(self) as *mut c_void
    }

    /// # Safety
    /// `ptr` must have been produced by [`ProgressState::into_user_data`]
    /// and not already reclaimed.
    pub(crate) unsafe fn reclaim(ptr: *mut c_void) {
        if !ptr.is_null() {
            drop(Box::from_raw(ptr as *mut ProgressState));
        }
    }
}

pub(crate) extern "C" fn trampoline(update: *const engine::XetProgressUpdate, user_data: *mut c_void) {
    if update.is_null() || user_data.is_null() {
        return;
    }
    let state = unsafe { &*(user_data as *const ProgressState) };
    let update = unsafe { ProgressUpdate::from_raw(&*update) };
    (state.handler)(update);
}

/// Builds the handler installed by `Client::enable_console_progress`: a
/// single carriage-return-terminated status line per throttle tick, with a
/// trailing newline once the operation reaches Finalizing at 100%.
/// Hand-rolled rather than pulled from an indicatif-style crate, since the
/// engine layer the wrapper binds to never depended on a terminal-UI crate
/// and the wrapper stays consistent with it for this one renderer.
pub(crate) fn console_handler(label: String) -> impl Fn(ProgressUpdate) + Send + Sync {
    move |update: ProgressUpdate| {
        let phase = match update.phase {
            Phase::Scanning => "scanning",
            Phase::Downloading => "downloading",
            Phase::Finalizing => "finalizing",
        };
        print!(
            "\r{label}: {phase}  {}/{} bytes ({}/{} files)",
            update.completed_bytes,
            update.total_bytes,
            update.completed_files,
            update.total_files,
        );
        let _ = std::io::stdout().flush();
        if update.is_done() {
            println!();
        }
    }
}

/// Floor matching the engine's own throttle floor, so a caller who never
/// thinks about it still gets the documented minimum interval.
pub const MIN_THROTTLE: Duration = Duration::from_millis(200);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn trampoline_invokes_boxed_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let state = Box::new(ProgressState::new(move |_update| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let user_data = state.into_user_data();

        let raw = engine::XetProgressUpdate {
            phase: 1,
            total_bytes: 100,
            completed_bytes: 50,
            total_files: 1,
            completed_files: 0,
            current_file: std::ptr::null(),
            current_file_completed_bytes: 50,
            current_file_total_bytes: 100,
        };
        trampoline(&raw as *const _, user_data);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        unsafe { ProgressState::reclaim(user_data) };
    }

    #[test]
    fn done_detection_requires_finalizing_and_full_bytes() {
        let mut update = ProgressUpdate {
            phase: Phase::Downloading,
            total_bytes: 10,
            completed_bytes: 10,
            total_files: 1,
            completed_files: 1,
            current_file: String::new(),
            current_file_completed_bytes: 10,
            current_file_total_bytes: 10,
        };
        assert!(!update.is_done());
        update.phase = Phase::Finalizing;
        assert!(update.is_done());
    }
}
