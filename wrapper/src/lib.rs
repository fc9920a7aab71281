//! Typed Rust client for the Hugging Face Hub download engine.
//!
//! This crate is an ordinary consumer of [`hfhub_xet_engine`]'s C ABI —
//! it never reaches past `extern "C"` into the engine's internals. It
//! exists to show, in Rust, the same shape a real cross-language binding
//! (Python, Node, …) would present: a typed client object, owned
//! collections instead of raw arrays, a `thiserror` error enum instead of
//! a heap-allocated struct, and callback trampolines that keep consumer
//! closures alive for exactly as long as the engine might call them.

mod cancellation;
mod client;
mod config;
mod error;
mod progress;
mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ErrorCode, Result, XetClientError};
pub use progress::{Phase, ProgressUpdate};
pub use types::{DownloadRequest, FileInfo, SnapshotRequest};

use hfhub_xet_engine as engine;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Link-time ABI version guard: taking this function's address makes an
/// ABI layout break a link-time failure in any binary built against this
/// wrapper, rather than a runtime surprise. Bump alongside the engine's
/// own `xet_version_1_0_0` whenever the ABI changes.
#[used]
static ABI_VERSION_GUARD: extern "C" fn() = engine::xet_version_1_0_0;

static GLOBAL_CLIENT: OnceCell<Arc<Client>> = OnceCell::new();

/// Lazily construct (or return the already-constructed) process-wide
/// client, built from [`ClientConfig::from_env`].
///
/// This replaces the source project's implicit "default client built from
/// environment variables at first use" pattern with an explicit, lazily
/// initialized factory: nothing runs at module load, construction happens
/// on first call, and `XET_DISABLE_GLOBAL_CLIENT` (read fresh on every
/// call, for tests) forces a brand-new client instead of the cached one.
pub fn global_client() -> Result<Arc<Client>> {
    if std::env::var("XET_DISABLE_GLOBAL_CLIENT").is_ok() {
        return Client::from_env().map(Arc::new);
    }
    GLOBAL_CLIENT
        .get_or_try_init(|| Client::from_env().map(Arc::new))
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_client_disable_switch_skips_cache() {
        std::env::set_var("XET_DISABLE_GLOBAL_CLIENT", "1");
        let a = global_client().unwrap();
        let b = global_client().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        std::env::remove_var("XET_DISABLE_GLOBAL_CLIENT");
    }
}
