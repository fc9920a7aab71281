// Module declarations - following hf_xet structure
mod cache;
mod cancellation;
mod config;
mod error;
mod ffi;
mod hf_adapter;
mod logging;
mod progress;
mod runtime;
mod token_refresh;
mod xet_downloader;
mod xet_integration;

// Public exports
pub use cancellation::{CancelPredicate, CancellationToken};
pub use config::Config;
pub use error::*;
pub use ffi::*;
pub use hf_adapter::HfFileInfo;
pub use progress::{XetProgressCallback, XetProgressPhase, XetProgressUpdate};
pub use token_refresh::XetTokenRefreshCallback;

// Re-export runtime utilities
pub use runtime::{block_on, get_runtime};

// Version check symbol for link-time verification. Bump the suffix and
// the exported name whenever a breaking ABI change ships.
#[no_mangle]
pub extern "C" fn xet_version_1_0_0() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_is_reachable_from_crate_root() {
        let runtime = get_runtime();
        assert!(runtime.handle().metrics().num_workers() > 0);
    }
}
