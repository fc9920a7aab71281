//! Builder-style configuration layered over the engine's plain `Config`
//! value record. Grounded on `gglib-hf`'s `HfClientConfig` (`with_*`
//! methods, `Default`) — the engine's own construction takes a plain
//! value struct, so this builder is a natural generalization for the
//! wrapper's typed-client surface.

use crate::error::{Result, XetClientError};

/// Default endpoint used when the caller never calls `with_endpoint`.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Construction-time configuration for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) endpoint: String,
    pub(crate) token: Option<String>,
    pub(crate) cache_dir: Option<String>,
    pub(crate) max_concurrent_downloads: u32,
    pub(crate) enable_dedup: bool,
    pub(crate) log_level: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            cache_dir: None,
            max_concurrent_downloads: 0,
            enable_dedup: true,
            log_level: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the Hub-compatible environment variables the
    /// engine's wrapper façade recognizes: `HF_ENDPOINT`, `HF_TOKEN` (or,
    /// failing that, `HUGGING_FACE_HUB_TOKEN`), `HF_HOME` (used verbatim as
    /// the cache directory), and `XET_LOG_LEVEL` (falling back to
    /// `RUST_LOG`). Read once; later changes to the environment are not
    /// observed.
    #[must_use]
    pub fn from_env() -> Self {
        let endpoint =
            std::env::var("HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let token = std::env::var("HF_TOKEN")
            .ok()
            .or_else(|| std::env::var("HUGGING_FACE_HUB_TOKEN").ok());
        let cache_dir = std::env::var("HF_HOME").ok();
        let log_level = std::env::var("XET_LOG_LEVEL")
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok());

        Self {
            endpoint,
            token,
            cache_dir,
            log_level,
            ..Self::default()
        }
    }

    /// Set the Hugging Face–compatible endpoint. Defaults to
    /// `https://huggingface.co`.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set a bearer token used for authenticated requests.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_optional_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Set the local cache directory. Defaults to the engine's own
    /// platform default when left unset.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<String>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Set the maximum number of files downloaded concurrently during a
    /// snapshot download. Zero means "use the engine's default of 4".
    #[must_use]
    pub const fn with_max_concurrent_downloads(mut self, max: u32) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    /// Enable or disable the CAS/xet dedup download path. Defaults to
    /// enabled.
    #[must_use]
    pub const fn with_dedup(mut self, enable: bool) -> Self {
        self.enable_dedup = enable;
        self
    }

    /// Set the `tracing` log-level filter the engine initializes with on
    /// first client construction.
    #[must_use]
    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = Some(log_level.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(XetClientError::invalid_config("endpoint must not be empty"));
        }
        Ok(())
    }
}
