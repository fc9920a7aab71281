//! Progress tracking: phase machine, per-operation state, and the
//! throttled notifier that bridges it to the installed C callback.

use async_trait::async_trait;
use progress_tracking::{ProgressUpdate as TrackerProgressUpdate, TrackingProgressUpdater};
use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// The floor below which a throttle interval is never allowed, regardless
/// of what the caller requests.
pub const MIN_THROTTLE_MS: u32 = 200;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum XetProgressPhase {
    Scanning = 0,
    Downloading = 1,
    Finalizing = 2,
}

/// C-layout snapshot of [`ProgressState`], handed to the installed
/// callback. `current_file` is borrowed for the duration of the call only
/// — the callback must not retain it.
#[repr(C)]
pub struct XetProgressUpdate {
    pub phase: i32,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub total_files: u32,
    pub completed_files: u32,
    pub current_file: *const c_char,
    pub current_file_completed_bytes: u64,
    pub current_file_total_bytes: u64,
}

pub type XetProgressCallback =
    extern "C" fn(update: *const XetProgressUpdate, user_data: *mut c_void);

/// A monotonically advancing snapshot of a single operation's progress.
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    pub phase_i: i32,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub total_files: u32,
    pub completed_files: u32,
    pub current_file: String,
    pub current_file_completed_bytes: u64,
    pub current_file_total_bytes: u64,
}

impl ProgressState {
    fn set_phase(&mut self, phase: XetProgressPhase) {
        // Phases only ever advance: Scanning(0) -> Downloading(1) -> Finalizing(2).
        if phase as i32 > self.phase_i {
            self.phase_i = phase as i32;
        }
    }

    fn to_c_snapshot(&self, current_file_cstr: &CString) -> XetProgressUpdate {
        XetProgressUpdate {
            phase: self.phase_i,
            total_bytes: self.total_bytes,
            completed_bytes: self.completed_bytes,
            total_files: self.total_files,
            completed_files: self.completed_files,
            current_file: current_file_cstr.as_ptr(),
            current_file_completed_bytes: self.current_file_completed_bytes,
            current_file_total_bytes: self.current_file_total_bytes,
        }
    }
}

/// Rate-limiter for progress emission. Ensures callbacks fire no more
/// often than the configured interval, with a floor of [`MIN_THROTTLE_MS`].
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(requested_ms: u32) -> Self {
        let ms = requested_ms.max(MIN_THROTTLE_MS);
        Self {
            last_emit: None,
            min_interval: Duration::from_millis(ms as u64),
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.min_interval
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

/// Thread-safe holder for a C callback pointer plus its `user_data`. The
/// C caller is responsible for `user_data`'s thread-safety contract.
struct CallbackHandle {
    callback: XetProgressCallback,
    user_data: usize,
    throttle_ms: u32,
}

unsafe impl Send for CallbackHandle {}
unsafe impl Sync for CallbackHandle {}

impl CallbackHandle {
    fn invoke(&self, state: &ProgressState) {
        let current_file = CString::new(state.current_file.as_str()).unwrap_or_default();
        let snapshot = state.to_c_snapshot(&current_file);
        (self.callback)(
            &snapshot as *const XetProgressUpdate,
            self.user_data as *mut c_void,
        );
    }
}

/// Owned by the [`crate::XetClient`]; holds at most one installed
/// progress handler. Installing a new handler first detaches and drops
/// the previous one.
#[derive(Default)]
pub struct ProgressHandler {
    slot: Mutex<Option<Arc<CallbackHandle>>>,
}

impl ProgressHandler {
    pub fn configure(
        &self,
        callback: Option<XetProgressCallback>,
        user_data: *mut c_void,
        throttle_ms: u32,
    ) {
        let mut slot = self.slot.lock().unwrap();
        *slot = callback.map(|callback| {
            Arc::new(CallbackHandle {
                callback,
                user_data: user_data as usize,
                throttle_ms,
            })
        });
    }

    pub fn detach(&self) {
        self.slot.lock().unwrap().take();
    }

    /// Start tracking a new operation, bound to whichever handler is
    /// currently installed (or none, if progress reporting was never
    /// configured).
    pub fn new_operation(&self) -> Option<OperationProgress> {
        let handle = self.slot.lock().unwrap().clone();
        Some(OperationProgress::new(handle))
    }
}

struct OperationInner {
    state: Mutex<ProgressState>,
    handle: Option<Arc<CallbackHandle>>,
    throttle: Mutex<ProgressThrottle>,
}

/// Aborts the sampler task when dropped. Held by every clone of an
/// [`OperationProgress`] via a shared `Arc`, so the task is stopped the
/// moment the last clone goes away — on success (where `finalize` also
/// aborts it directly), on an error `?` return, and on cancellation alike.
/// The sampled task itself only holds a `Weak` back-reference, so it never
/// keeps this guard alive.
struct TaskGuard(Mutex<Option<JoinHandle<()>>>);

impl TaskGuard {
    fn abort(&self) {
        if let Some(task) = self.0.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Per-operation progress tracker, cheaply cloned (`Arc`-backed) so it can
/// be shared across the concurrent file tasks of a snapshot download.
#[derive(Clone)]
pub struct OperationProgress {
    inner: Arc<OperationInner>,
    task_guard: Arc<TaskGuard>,
}

impl OperationProgress {
    fn new(handle: Option<Arc<CallbackHandle>>) -> Self {
        let throttle_ms = handle
            .as_ref()
            .map(|h| h.throttle_ms)
            .unwrap_or(MIN_THROTTLE_MS);
        let inner = Arc::new(OperationInner {
            state: Mutex::new(ProgressState::default()),
            handle,
            throttle: Mutex::new(ProgressThrottle::new(throttle_ms)),
        });

        let task = Self::spawn_throttle_task(&inner);
        Self {
            inner,
            task_guard: Arc::new(TaskGuard(Mutex::new(task))),
        }
    }

    /// Spawned onto the global runtime directly through the `Runtime`
    /// handle rather than ambient `tokio::spawn`, so it works whether or
    /// not the calling thread is currently inside a `block_on`.
    fn spawn_throttle_task(inner: &Arc<OperationInner>) -> Option<JoinHandle<()>> {
        if inner.handle.is_none() {
            return None;
        }
        let weak = Arc::downgrade(inner);
        let interval = inner.throttle.lock().unwrap().interval();
        Some(crate::get_runtime().spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                emit(&inner, false);
            }
        }))
    }

    /// A handle suitable for moving into a concurrent file task: shares
    /// the same underlying state and callback as `self`.
    pub fn clone_for_tasks(&self) -> Self {
        self.clone()
    }

    pub fn set_phase(&self, phase: XetProgressPhase, force: bool) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.set_phase(phase);
        }
        if force {
            emit(&self.inner, true);
        }
    }

    /// Totals may only change during Scanning.
    pub fn set_total_hint(&self, total_files: usize, total_bytes: u64) {
        let mut state = self.inner.state.lock().unwrap();
        state.total_files = total_files as u32;
        state.total_bytes = total_bytes;
    }

    pub fn ensure_file_entry(&self, path: &str, total_bytes: u64) {
        let mut state = self.inner.state.lock().unwrap();
        state.current_file = path.to_string();
        state.current_file_total_bytes = total_bytes;
        state.current_file_completed_bytes = 0;
    }

    /// Record an absolute progress value for the current file. `done`
    /// marks this file as complete, which also advances the operation's
    /// completed-file counter (never backwards).
    pub fn update_file_absolute(&self, path: &str, completed: u64, total: u64, done: bool) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.current_file != path {
                state.current_file = path.to_string();
            }
            state.current_file_total_bytes = total;
            let delta = completed.saturating_sub(state.current_file_completed_bytes);
            state.current_file_completed_bytes = completed;
            state.completed_bytes = state.completed_bytes.saturating_add(delta);
            if state.completed_bytes > state.total_bytes {
                state.total_bytes = state.completed_bytes;
            }
            if done {
                state.completed_files = state.completed_files.saturating_add(1);
                if state.completed_files > state.total_files {
                    state.total_files = state.completed_files;
                }
            }
        }
        maybe_emit(&self.inner);
    }

    /// Apply an update surfaced by xet-core's `progress_tracking` crate.
    pub fn apply_tracking_update(&self, update: &TrackerProgressUpdate) {
        for item in &update.item_updates {
            self.update_file_absolute(
                &item.item_name,
                item.bytes_completed,
                item.total_bytes,
                item.total_bytes > 0 && item.bytes_completed >= item.total_bytes,
            );
        }
    }

    /// Bypass the throttle and emit immediately (used on `flush()`).
    pub fn force_emit(&self) {
        emit(&self.inner, true);
    }

    /// Move to Finalizing and guarantee the terminal update is delivered,
    /// regardless of throttle state. Stops the background sampler.
    pub fn finalize(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.set_phase(XetProgressPhase::Finalizing);
            if state.completed_bytes < state.total_bytes {
                state.completed_bytes = state.total_bytes;
            }
            if state.completed_files < state.total_files {
                state.completed_files = state.total_files;
            }
        }
        emit(&self.inner, true);
        self.task_guard.abort();
    }
}

fn maybe_emit(inner: &Arc<OperationInner>) {
    let due = inner.throttle.lock().unwrap().should_emit();
    if due {
        emit(inner, false);
    }
}

fn emit(inner: &Arc<OperationInner>, reset_throttle: bool) {
    let Some(handle) = inner.handle.as_ref() else {
        return;
    };
    let state = inner.state.lock().unwrap().clone();
    handle.invoke(&state);
    if reset_throttle {
        inner.throttle.lock().unwrap().reset();
    }
}

/// Bridges an [`OperationProgress`] into xet-core's `TrackingProgressUpdater`
/// trait so the CAS `FileDownloader` can drive it directly.
pub struct ProgressBridge {
    progress: OperationProgress,
}

impl ProgressBridge {
    pub fn new(progress: OperationProgress) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl TrackingProgressUpdater for ProgressBridge {
    async fn register_updates(&self, updates: TrackerProgressUpdate) {
        self.progress.apply_tracking_update(&updates);
    }

    async fn flush(&self) {
        self.progress.force_emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_enforces_floor() {
        let throttle = ProgressThrottle::new(10);
        assert_eq!(
            throttle.interval(),
            Duration::from_millis(MIN_THROTTLE_MS as u64)
        );
    }

    #[test]
    fn throttle_respects_requested_interval_above_floor() {
        let throttle = ProgressThrottle::new(500);
        assert_eq!(throttle.interval(), Duration::from_millis(500));
    }

    #[test]
    fn phase_never_regresses() {
        let mut state = ProgressState::default();
        state.set_phase(XetProgressPhase::Downloading);
        state.set_phase(XetProgressPhase::Scanning);
        assert_eq!(state.phase_i, XetProgressPhase::Downloading as i32);
        state.set_phase(XetProgressPhase::Finalizing);
        assert_eq!(state.phase_i, XetProgressPhase::Finalizing as i32);
    }

    #[tokio::test]
    async fn completed_bytes_never_exceed_total_after_update() {
        let handler = ProgressHandler::default();
        let op = handler.new_operation().unwrap();
        op.set_total_hint(1, 100);
        op.ensure_file_entry("a.bin", 100);
        op.update_file_absolute("a.bin", 150, 150, true);
        let state = op.inner.state.lock().unwrap().clone();
        assert!(state.completed_bytes <= state.total_bytes);
        assert!(state.completed_files <= state.total_files);
    }

    #[tokio::test]
    async fn finalize_reaches_totals() {
        let handler = ProgressHandler::default();
        let op = handler.new_operation().unwrap();
        op.set_total_hint(2, 200);
        op.ensure_file_entry("a.bin", 100);
        op.update_file_absolute("a.bin", 100, 100, true);
        op.finalize();
        let state = op.inner.state.lock().unwrap().clone();
        assert_eq!(state.phase_i, XetProgressPhase::Finalizing as i32);
        assert!(state.completed_bytes >= state.total_bytes);
        assert!(state.completed_files >= state.total_files);
    }
}
