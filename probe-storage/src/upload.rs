use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use crate::bucket::open_bucket;
use crate::error::StorageError;

/// Recursively upload everything under `evidence_dir` to
/// `<bucket>/evidence/<relative path>`. A missing or empty evidence
/// directory is a no-op success. Returns the number of files uploaded.
pub async fn upload_evidence(
    bucket_uri: &str,
    evidence_dir: &Path,
) -> Result<usize, StorageError> {
    if !evidence_dir.exists() {
        debug!(dir = %evidence_dir.display(), "no evidence directory, skipping upload");
        return Ok(0);
    }

    let (store, prefix) = open_bucket(bucket_uri)?;
    let evidence_prefix = prefix.child("evidence");

    let files = collect_files(evidence_dir).await?;
    for file in &files {
        let Ok(relative) = file.strip_prefix(evidence_dir) else {
            continue;
        };

        let mut remote = evidence_prefix.clone();
        for component in relative.components() {
            remote = remote.child(component.as_os_str().to_string_lossy().as_ref());
        }

        let bytes = Bytes::from(tokio::fs::read(file).await?);
        store.put(&remote, bytes.into()).await?;
        debug!(local = %file.display(), remote = %remote, "uploaded evidence file");
    }

    info!(bucket = bucket_uri, files = files.len(), "evidence upload complete");
    Ok(files.len())
}

async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_evidence_preserving_relative_paths() {
        let bucket = tempfile::tempdir().unwrap();
        let evidence = tempfile::tempdir().unwrap();
        std::fs::write(evidence.path().join("report.json"), "[]").unwrap();
        std::fs::create_dir_all(evidence.path().join("screenshots")).unwrap();
        std::fs::write(evidence.path().join("screenshots/fail.png"), "png").unwrap();

        let uri = format!("file://{}", bucket.path().display());
        let uploaded = upload_evidence(&uri, evidence.path()).await.unwrap();
        assert_eq!(uploaded, 2);

        assert_eq!(
            std::fs::read_to_string(bucket.path().join("evidence/report.json")).unwrap(),
            "[]"
        );
        assert!(bucket.path().join("evidence/screenshots/fail.png").exists());
    }

    #[tokio::test]
    async fn missing_evidence_directory_is_a_noop() {
        let bucket = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", bucket.path().display());
        let uploaded = upload_evidence(&uri, Path::new("/nonexistent/evidence"))
            .await
            .unwrap();
        assert_eq!(uploaded, 0);
    }

    #[tokio::test]
    async fn empty_evidence_directory_uploads_nothing() {
        let bucket = tempfile::tempdir().unwrap();
        let evidence = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", bucket.path().display());
        let uploaded = upload_evidence(&uri, evidence.path()).await.unwrap();
        assert_eq!(uploaded, 0);
    }
}
