use crate::cache::{determine_destination, is_cached, AtomicWriter};
use crate::cancellation::{is_cancelled, CancelPredicate};
use crate::error::{code_for_status, Classified};
use crate::progress::{OperationProgress, XetProgressPhase};
use crate::token_refresh::TokenRefreshHook;
use crate::xet_integration::{parse_xet_file_data_from_headers, XetFileData, XetTokenManager};
use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct HfAdapter {
    endpoint: String,
    token: Arc<RwLock<Option<String>>>,
    token_refresh_hook: Arc<RwLock<Option<Arc<TokenRefreshHook>>>>,
    cache_dir: Option<PathBuf>,
    max_concurrent: usize,
    enable_dedup: bool,
    client: reqwest::Client,
    xet_token_manager: Arc<tokio::sync::Mutex<XetTokenManager>>,
}

#[derive(Debug, Clone)]
pub struct HfFileInfo {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub xet_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HfTreeItem {
    #[serde(rename = "type")]
    item_type: String,
    oid: String,
    size: u64,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    xet_hash: Option<String>,
}

const MAX_HTTP_RETRIES: usize = 3;
const RETRY_BACKOFF_MS: u64 = 200;
const REQUEST_TIMEOUT_SECS: u64 = 30;

impl HfAdapter {
    async fn send_with_retry<F, S>(
        &self,
        mut builder: F,
        description: &str,
        is_success: S,
    ) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
        S: Fn(&reqwest::Response) -> bool,
    {
        for attempt in 0..=MAX_HTTP_RETRIES {
            match builder().send().await {
                Ok(resp) => {
                    if is_success(&resp) {
                        return Ok(resp);
                    }

                    let status = resp.status();
                    debug!(
                        "[RETRY] {} attempt {} failed with HTTP {}",
                        description,
                        attempt + 1,
                        status
                    );

                    let is_auth_failure = status.as_u16() == 401 || status.as_u16() == 403;
                    let retryable_4xx = status.as_u16() == 408 || status.as_u16() == 429;

                    // 4xx other than 401/403/408/429 is never retried: it will
                    // not succeed on a later attempt.
                    if status.is_client_error() && !is_auth_failure && !retryable_4xx {
                        return Err(match code_for_status(status) {
                            Some(code) => anyhow::Error::new(Classified::new(
                                code,
                                format!("{description} failed: HTTP {status}"),
                            )),
                            None => anyhow!("{description} failed: HTTP {status}"),
                        });
                    }

                    if attempt == MAX_HTTP_RETRIES {
                        return Err(match code_for_status(status) {
                            Some(code) => anyhow::Error::new(Classified::new(
                                code,
                                format!("{description} failed: HTTP {status}"),
                            )),
                            None => anyhow!("{description} failed after {} attempts: HTTP {status}", attempt + 1),
                        });
                    }

                    if is_auth_failure {
                        // No point retrying an auth failure unless a refresh hook is installed.
                        if !self.try_refresh_token().await {
                            return Err(anyhow::Error::new(Classified::new(
                                code_for_status(status).unwrap_or(crate::error::XetErrorCode::AuthFailed),
                                format!("{description} failed: HTTP {status}"),
                            )));
                        }
                    }
                }
                Err(err) => {
                    debug!(
                        "[RETRY] {} attempt {} errored: {}",
                        description,
                        attempt + 1,
                        err
                    );

                    if attempt == MAX_HTTP_RETRIES {
                        return Err(anyhow::Error::new(err)
                            .context(format!("{description} failed after {} attempts", attempt + 1)));
                    }
                }
            }

            sleep(Duration::from_millis(
                RETRY_BACKOFF_MS * (attempt as u64 + 1),
            ))
            .await;
        }

        unreachable!("retry loop should always return or err");
    }

    /// Attempt to obtain a fresh bearer token from the installed hook and
    /// swap it in. Returns false when no hook is installed or it declines.
    async fn try_refresh_token(&self) -> bool {
        let hook = self.token_refresh_hook.read().await.clone();
        let Some(hook) = hook else {
            return false;
        };
        match hook.call() {
            Ok((token, _expiry)) => {
                *self.token.write().await = Some(token);
                true
            }
            Err(err) => {
                warn!("[AUTH] token refresh hook declined: {err}");
                false
            }
        }
    }

    pub fn new(
        endpoint: String,
        token: Option<String>,
        cache_dir: Option<String>,
        max_concurrent: usize,
        enable_dedup: bool,
    ) -> Result<Self> {
        let cache_dir = cache_dir.map(PathBuf::from);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let xet_token_manager =
            Arc::new(tokio::sync::Mutex::new(XetTokenManager::new(token.clone())));

        Ok(HfAdapter {
            endpoint,
            token: Arc::new(RwLock::new(token)),
            token_refresh_hook: Arc::new(RwLock::new(None)),
            cache_dir,
            max_concurrent,
            enable_dedup,
            client,
            xet_token_manager,
        })
    }

    pub async fn set_token_refresh_hook(&self, hook: Option<TokenRefreshHook>) {
        *self.token_refresh_hook.write().await = hook.map(Arc::new);
    }

    async fn auth_header(&self) -> Option<String> {
        self.token.read().await.as_ref().map(|t| format!("Bearer {t}"))
    }

    pub async fn list_files(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<HfFileInfo>> {
        let revision = revision.unwrap_or("main");
        let url = format!("{}/api/models/{}/tree/{}", self.endpoint, repo_id, revision);
        let auth = self.auth_header().await;

        let response = self
            .send_with_retry(
                || {
                    let mut builder = self.client.get(&url);
                    if let Some(ref auth) = auth {
                        builder = builder.header(reqwest::header::AUTHORIZATION, auth.clone());
                    }
                    builder
                },
                "list files",
                |resp| resp.status().is_success(),
            )
            .await?;

        // A 404/410 never reaches here as `Ok`: `send_with_retry` classifies
        // it and returns `Err` immediately.
        let tree_items: Vec<HfTreeItem> = response.json().await?;

        let files: Vec<HfFileInfo> = tree_items
            .into_iter()
            .filter(|item| item.item_type == "file")
            .map(|item| HfFileInfo {
                path: item.path,
                hash: item.oid,
                size: item.size,
                xet_hash: item.xet_hash,
            })
            .collect();

        Ok(files)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn download_file_with_cancel(
        &self,
        repo_id: &str,
        filename: &str,
        repo_type: Option<&str>,
        revision: Option<&str>,
        local_dir: Option<&str>,
        cancel_check: Option<CancelPredicate>,
        progress: Option<OperationProgress>,
    ) -> Result<String> {
        let revision = revision.unwrap_or("main");

        if let Some(ref tracker) = progress {
            tracker.set_phase(XetProgressPhase::Scanning, true);
        }

        if is_cancelled(&cancel_check) {
            return Err(Classified::cancelled());
        }

        let files = self.list_files(repo_id, Some(revision)).await?;
        let file_info = files
            .iter()
            .find(|f| f.path == filename)
            .cloned()
            .ok_or_else(|| Classified::not_found(format!("file {filename} not found in repository")))?;

        if let Some(ref tracker) = progress {
            tracker.set_total_hint(1, file_info.size);
            tracker.set_phase(XetProgressPhase::Downloading, true);
            tracker.ensure_file_entry(&file_info.path, file_info.size);
        }

        let output = self
            .download_file_with_info(
                repo_id,
                repo_type,
                revision,
                local_dir,
                &file_info,
                cancel_check,
                progress.as_ref().map(|p| p.clone_for_tasks()),
            )
            .await?;

        if let Some(tracker) = progress {
            tracker.finalize();
        }

        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn download_snapshot(
        &self,
        repo_id: &str,
        repo_type: Option<&str>,
        revision: Option<&str>,
        local_dir: &str,
        allow_patterns: Option<Vec<String>>,
        ignore_patterns: Option<Vec<String>>,
        cancel_check: Option<CancelPredicate>,
        progress: Option<OperationProgress>,
    ) -> Result<String> {
        let revision = revision.unwrap_or("main");
        if let Some(ref tracker) = progress {
            tracker.set_phase(XetProgressPhase::Scanning, true);
        }

        if is_cancelled(&cancel_check) {
            return Err(Classified::cancelled());
        }

        // allow_patterns/ignore_patterns are accepted for forward-compatibility
        // with the wrapper's request shape but have no effect yet; every listed
        // file is downloaded regardless. See the snapshot pattern-filtering note
        // in DESIGN.md.
        let _ = (&allow_patterns, &ignore_patterns);
        let filtered_files: Vec<_> = self.list_files(repo_id, Some(revision)).await?;

        let total_bytes: u64 = filtered_files.iter().map(|f| f.size).sum();
        if let Some(ref tracker) = progress {
            tracker.set_total_hint(filtered_files.len(), total_bytes);
            tracker.set_phase(XetProgressPhase::Downloading, true);
        }

        tokio::fs::create_dir_all(local_dir).await?;

        let max_concurrent = self.max_concurrent.max(1).min(filtered_files.len().max(1));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrent));
        let progress_shared = progress.as_ref().map(|p| p.clone_for_tasks());

        let download_futures = filtered_files.into_iter().map(|file| {
            let semaphore = semaphore.clone();
            let adapter = self.clone();
            let repo_id = repo_id.to_string();
            let repo_type = repo_type.map(|s| s.to_string());
            let revision = revision.to_string();
            let local_dir = local_dir.to_string();
            let cancel_check = cancel_check.clone();
            let progress = progress_shared.clone();

            async move {
                let _permit = semaphore.acquire().await?;

                if is_cancelled(&cancel_check) {
                    return Err(Classified::cancelled());
                }

                adapter
                    .download_file_with_info(
                        &repo_id,
                        repo_type.as_deref(),
                        &revision,
                        Some(&local_dir),
                        &file,
                        cancel_check.clone(),
                        progress.as_ref().map(|p| p.clone_for_tasks()),
                    )
                    .await
            }
        });

        let results: Vec<Result<String>> = stream::iter(download_futures)
            .buffer_unordered(max_concurrent)
            .collect()
            .await;

        for result in results {
            result?;
        }

        if let Some(tracker) = progress {
            tracker.finalize();
        }

        Ok(local_dir.to_string())
    }

    #[allow(clippy::too_many_arguments)]
    async fn download_file_with_info(
        &self,
        repo_id: &str,
        _repo_type: Option<&str>,
        revision: &str,
        local_dir: Option<&str>,
        file_info: &HfFileInfo,
        cancel_check: Option<CancelPredicate>,
        progress: Option<OperationProgress>,
    ) -> Result<String> {
        if is_cancelled(&cancel_check) {
            return Err(Classified::cancelled());
        }

        let destination = determine_destination(
            local_dir,
            self.cache_dir.as_deref(),
            repo_id,
            revision,
            &file_info.path,
        );

        if is_cached(&destination, file_info.size).await {
            debug!("[CACHE HIT] {} ({} bytes)", file_info.path, file_info.size);
            if let Some(ref tracker) = progress {
                tracker.ensure_file_entry(&file_info.path, file_info.size);
                tracker.update_file_absolute(&file_info.path, file_info.size, file_info.size, true);
            }
            return Ok(destination.to_string_lossy().to_string());
        }

        let download_url = format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, repo_id, revision, file_info.path
        );

        let no_redirect_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let auth_header = self.auth_header().await;

        let head_response = self
            .send_with_retry(
                || {
                    let mut builder = no_redirect_client.head(&download_url);
                    if let Some(ref auth) = auth_header {
                        builder = builder.header(reqwest::header::AUTHORIZATION, auth.clone());
                    }
                    builder
                },
                "head request",
                |resp| resp.status().is_success() || resp.status().is_redirection(),
            )
            .await?;

        let xet_file_data = parse_xet_file_data_from_headers(head_response.headers());

        if let Some(xet_data) = xet_file_data {
            if self.enable_dedup {
                info!("[XET] File has XET support - hash: {}", xet_data.file_hash);
                debug!("[XET] Refresh route: {}", xet_data.refresh_route);

                match self
                    .download_with_xet(
                        &file_info.path,
                        &xet_data,
                        &destination,
                        file_info.size,
                        cancel_check.clone(),
                        progress.as_ref().map(|p| p.clone_for_tasks()),
                    )
                    .await
                {
                    Ok(path) => return Ok(path),
                    Err(err) => {
                        debug!("[XET] Falling back to HTTP download: {err:?}");
                    }
                }
            } else {
                debug!("[XET] File has XET support but dedup is disabled");
            }
        } else {
            debug!("[XET] No XET metadata found for file");
        }

        if is_cancelled(&cancel_check) {
            return Err(Classified::cancelled());
        }

        self.download_plain_http(&download_url, &destination, file_info, &cancel_check, &progress)
            .await
    }

    async fn download_plain_http(
        &self,
        download_url: &str,
        destination: &Path,
        file_info: &HfFileInfo,
        cancel_check: &Option<CancelPredicate>,
        progress: &Option<OperationProgress>,
    ) -> Result<String> {
        let auth_header = self.auth_header().await;
        let response = self
            .send_with_retry(
                || {
                    let mut builder = self.client.get(download_url);
                    if let Some(ref auth) = auth_header {
                        builder = builder.header(reqwest::header::AUTHORIZATION, auth.clone());
                    }
                    builder
                },
                "download request",
                |resp| resp.status().is_success(),
            )
            .await?;

        let expected_total = response.content_length().unwrap_or(file_info.size);
        if let Some(ref tracker) = progress {
            tracker.ensure_file_entry(&file_info.path, expected_total);
        }

        let expected_sha256 = sha256_hex(&file_info.hash);
        let mut hasher = expected_sha256.as_ref().map(|_| Sha256::new());

        let mut stream = response.bytes_stream();
        let mut writer = AtomicWriter::create(destination).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    writer.discard().await;
                    return Err(err.into());
                }
            };
            downloaded += chunk.len() as u64;

            if is_cancelled(cancel_check) {
                writer.discard().await;
                return Err(Classified::cancelled());
            }

            if let Some(ref mut hasher) = hasher {
                hasher.update(&chunk);
            }

            if let Err(err) = writer.write_all(&chunk).await {
                writer.discard().await;
                return Err(err);
            }
            if let Some(ref tracker) = progress {
                tracker.update_file_absolute(&file_info.path, downloaded, expected_total, false);
            }
        }

        if let (Some(expected), Some(hasher)) = (expected_sha256, hasher) {
            let actual = hex::encode(hasher.finalize());
            if actual != expected {
                writer.discard().await;
                return Err(Classified::checksum_mismatch(format!(
                    "sha256 mismatch for {}: expected {expected}, got {actual}",
                    file_info.path
                )));
            }
        }

        writer.commit().await?;

        if let Some(ref tracker) = progress {
            tracker.update_file_absolute(&file_info.path, downloaded, expected_total, true);
        }

        Ok(destination.to_string_lossy().to_string())
    }

    async fn download_with_xet(
        &self,
        file_name: &str,
        xet_file_data: &XetFileData,
        dest_path: &Path,
        expected_size: u64,
        cancel_check: Option<CancelPredicate>,
        progress: Option<OperationProgress>,
    ) -> Result<String> {
        use crate::xet_downloader::XetDownloader;

        if is_cancelled(&cancel_check) {
            return Err(Classified::cancelled());
        }

        let mut token_manager = self.xet_token_manager.lock().await;
        let connection_info = token_manager
            .refresh_xet_connection_info(xet_file_data)
            .await
            .context("failed to obtain XET connection info")?;
        drop(token_manager);

        info!(
            "[XET] Using xet-core FileDownloader for hash: {}",
            xet_file_data.file_hash
        );
        debug!("[XET] Endpoint: {}", connection_info.endpoint);

        let xet_downloader = XetDownloader::new(
            &connection_info,
            xet_file_data,
            self.xet_token_manager.clone(),
        )
        .await?;

        if let Some(ref tracker) = progress {
            tracker.ensure_file_entry(file_name, expected_size);
        }

        if is_cancelled(&cancel_check) {
            return Err(Classified::cancelled());
        }

        let _bytes_downloaded = xet_downloader
            .download_file(
                &xet_file_data.file_hash,
                dest_path,
                file_name,
                expected_size,
                progress.as_ref().map(|p| p.clone_for_tasks()),
            )
            .await?;

        if let Some(ref tracker) = progress {
            tracker.update_file_absolute(file_name, expected_size, expected_size, true);
        }

        Ok(dest_path.to_string_lossy().to_string())
    }
}

/// LFS-style objects publish their sha256 as the file's `oid` when it is a
/// 64-character hex string (a git blob OID is sha1, 40 hex characters, so
/// this distinguishes the two without another API round-trip).
fn sha256_hex(oid: &str) -> Option<String> {
    if oid.len() == 64 && oid.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(oid.to_ascii_lowercase())
    } else {
        None
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}
