//! Local cache-directory layout and atomic-write helpers shared by the
//! plain-HTTPS and XET download paths.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Resolve the on-disk destination for a file, in order of preference:
/// an explicit `local_dir`, then the configured cache directory laid out
/// as `<cache_dir>/<repo_id with '/' -> '--'>/<revision>/<path>`, then the
/// bare filename in the current directory.
pub fn determine_destination(
    local_dir: Option<&str>,
    cache_dir: Option<&Path>,
    repo_id: &str,
    revision: &str,
    path: &str,
) -> PathBuf {
    if let Some(local_dir) = local_dir {
        let mut dest = PathBuf::from(local_dir);
        for part in path.split('/') {
            dest.push(part);
        }
        return dest;
    }

    if let Some(cache_dir) = cache_dir {
        let mut dest = cache_dir.to_path_buf();
        dest.push(repo_id.replace('/', "--"));
        dest.push(revision);
        for part in path.split('/') {
            dest.push(part);
        }
        return dest;
    }

    PathBuf::from(path)
}

/// A file is considered cached if it already exists at `destination` with
/// the expected size. Content-hash verification, when a hash is known, is
/// layered on top by the caller.
pub async fn is_cached(destination: &Path, expected_size: u64) -> bool {
    match fs::metadata(destination).await {
        Ok(metadata) => metadata.len() == expected_size,
        Err(_) => false,
    }
}

/// Write `destination.part`, fsync it, and rename it into place. On any
/// failure the partial file is removed so `.part` files never linger in
/// the target directory on error paths.
pub struct AtomicWriter {
    part_path: PathBuf,
    destination: PathBuf,
    file: fs::File,
}

impl AtomicWriter {
    pub async fn create(destination: &Path) -> Result<Self> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part_path = part_path_for(destination);
        let file = fs::File::create(&part_path).await?;
        Ok(Self {
            part_path,
            destination: destination.to_path_buf(),
            file,
        })
    }

    pub async fn write_all(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    /// Flush, fsync, and rename into place. Consumes `self`; on error the
    /// `.part` file is left for `discard` to clean up.
    pub async fn commit(mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        fs::rename(&self.part_path, &self.destination).await?;
        Ok(())
    }

    /// Remove the `.part` file without renaming. Used on cancellation and
    /// on any failure path that doesn't call `commit`.
    pub async fn discard(self) {
        let _ = fs::remove_file(&self.part_path).await;
    }
}

fn part_path_for(destination: &Path) -> PathBuf {
    let mut part = destination.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_prefers_local_dir() {
        let dest = determine_destination(
            Some("/tmp/out"),
            Some(Path::new("/cache")),
            "org/repo",
            "main",
            "sub/file.bin",
        );
        assert_eq!(dest, PathBuf::from("/tmp/out/sub/file.bin"));
    }

    #[test]
    fn destination_falls_back_to_cache_dir() {
        let dest = determine_destination(None, Some(Path::new("/cache")), "org/repo", "main", "file.bin");
        assert_eq!(dest, PathBuf::from("/cache/org--repo/main/file.bin"));
    }

    #[test]
    fn destination_falls_back_to_cwd() {
        let dest = determine_destination(None, None, "org/repo", "main", "file.bin");
        assert_eq!(dest, PathBuf::from("file.bin"));
    }

    #[tokio::test]
    async fn atomic_writer_commits_and_cleans_part_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.bin");
        let mut writer = AtomicWriter::create(&destination).await.unwrap();
        writer.write_all(b"hello").await.unwrap();
        writer.commit().await.unwrap();

        assert!(destination.exists());
        assert!(!part_path_for(&destination).exists());
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn atomic_writer_discard_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.bin");
        let mut writer = AtomicWriter::create(&destination).await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        writer.discard().await;

        assert!(!destination.exists());
        assert!(!part_path_for(&destination).exists());
    }
}
