//! Owned, typed request/response shapes exposed by the wrapper. These are
//! plain value types the consumer builds and reads — no raw pointers, no
//! ABI structs — converted to and from the C layout entirely inside
//! `client.rs`.

/// A single file entry as returned by [`crate::Client::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

/// Request for [`crate::Client::download_file`] /
/// [`crate::Client::download_file_with_context`].
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub repo_id: String,
    pub repo_type: Option<String>,
    pub revision: Option<String>,
    pub filename: String,
    pub local_dir: Option<String>,
}

impl DownloadRequest {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            repo_type: None,
            revision: None,
            filename: filename.into(),
            local_dir: None,
        }
    }

    #[must_use]
    pub fn with_repo_type(mut self, repo_type: impl Into<String>) -> Self {
        self.repo_type = Some(repo_type.into());
        self
    }

    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    #[must_use]
    pub fn with_local_dir(mut self, local_dir: impl Into<String>) -> Self {
        self.local_dir = Some(local_dir.into());
        self
    }
}

/// Request for [`crate::Client::download_snapshot`] /
/// [`crate::Client::download_snapshot_with_context`].
///
/// `allow_patterns`/`ignore_patterns` are accepted here for a
/// Hub-client-shaped request surface, but — as documented in the engine's
/// `hf_adapter::download_snapshot` — they currently have no effect: every
/// listed file is downloaded. This is a known limitation, not a bug.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub repo_id: String,
    pub repo_type: Option<String>,
    pub revision: Option<String>,
    pub local_dir: String,
    pub allow_patterns: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
}

impl SnapshotRequest {
    pub fn new(repo_id: impl Into<String>, local_dir: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            repo_type: None,
            revision: None,
            local_dir: local_dir.into(),
            allow_patterns: None,
            ignore_patterns: None,
        }
    }

    #[must_use]
    pub fn with_repo_type(mut self, repo_type: impl Into<String>) -> Self {
        self.repo_type = Some(repo_type.into());
        self
    }

    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    #[must_use]
    pub fn with_allow_patterns(mut self, patterns: Vec<String>) -> Self {
        self.allow_patterns = Some(patterns);
        self
    }

    #[must_use]
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = Some(patterns);
        self
    }
}
