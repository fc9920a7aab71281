//! Value-typed client configuration, read once at construction.

use anyhow::{anyhow, Result};

/// Default number of files downloaded concurrently when the caller leaves
/// `max_concurrent_downloads` at zero.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Construction-time configuration for a [`crate::XetClient`].
///
/// `Config` is a plain value record: its fields are copied into the client
/// during construction and it is not retained afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<String>,
    pub cache_dir: Option<String>,
    pub max_concurrent_downloads: usize,
    pub enable_dedup: bool,
    pub log_level: Option<String>,
}

impl Config {
    /// Validate and normalize a config read from the ABI boundary.
    ///
    /// `endpoint` must be non-empty; `max_concurrent_downloads` of zero is
    /// treated as "use the default" rather than an error.
    pub fn validate(mut self) -> Result<Self> {
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("endpoint must not be empty"));
        }
        if self.max_concurrent_downloads == 0 {
            self.max_concurrent_downloads = DEFAULT_MAX_CONCURRENT_DOWNLOADS;
        }
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "https://huggingface.co".to_string(),
            token: None,
            cache_dir: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            enable_dedup: true,
            log_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_defaults() {
        let cfg = Config {
            max_concurrent_downloads: 0,
            ..Config::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT_DOWNLOADS);
    }

    #[test]
    fn empty_endpoint_rejected() {
        let cfg = Config {
            endpoint: "   ".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
