use std::path::PathBuf;

use futures::TryStreamExt;
use tracing::{debug, info};

use probe_common::validator::validate_topic_directives;
use probe_common::BlockStorageDirective;

use crate::bucket::open_bucket;
use crate::error::StorageError;
use crate::workspace::TestWorkspace;

/// A fetched and validated test package, materialized in the workspace.
#[derive(Debug)]
pub struct FetchedPackage {
    pub directive: BlockStorageDirective,
    /// Local root of the feature tree handed to the BDD runner.
    pub feature_root: PathBuf,
    /// Local directory the BDD runner writes reports into.
    pub evidence_dir: PathBuf,
}

/// Download the manifest and the `features/` tree from the bucket into the
/// workspace, preserving directory nesting verbatim. The manifest is parsed
/// and run through the directive validator before anything is returned.
pub async fn fetch_package(
    bucket_uri: &str,
    directive_file_name: &str,
    workspace: &TestWorkspace,
) -> Result<FetchedPackage, StorageError> {
    let (store, prefix) = open_bucket(bucket_uri)?;

    // Manifest first: without it there is nothing to wire up.
    let manifest_path = prefix.child(directive_file_name);
    let manifest_bytes = match store.get(&manifest_path).await {
        Ok(result) => result.bytes().await?,
        Err(object_store::Error::NotFound { .. }) => {
            return Err(StorageError::MissingTopicDirectiveFile(
                directive_file_name.to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let directive = BlockStorageDirective::from_slice(&manifest_bytes)
        .map_err(|e| StorageError::InvalidTopicDirectiveFormat(e.to_string()))?;
    validate_topic_directives(&directive.topic_directives)
        .map_err(|e| StorageError::InvalidTopicDirectiveFormat(e.to_string()))?;

    let feature_root = workspace.resolve(&directive.jimfs_location);
    let evidence_dir = workspace.resolve(&directive.evidence_dir);
    tokio::fs::create_dir_all(&feature_root).await?;
    tokio::fs::create_dir_all(&evidence_dir).await?;

    // Materialize features/** keeping the relative layout intact.
    let features_prefix = prefix.child("features");
    let objects: Vec<object_store::ObjectMeta> = store
        .list(Some(&features_prefix))
        .try_collect()
        .await?;

    if objects.is_empty() {
        return Err(StorageError::MissingFeaturesDirectory);
    }

    for meta in &objects {
        let relative: Vec<String> = meta
            .location
            .prefix_match(&features_prefix)
            .map(|parts| parts.map(|p| p.as_ref().to_string()).collect())
            .unwrap_or_default();
        if relative.is_empty() {
            continue;
        }

        let local_path = relative
            .iter()
            .fold(feature_root.clone(), |path, part| path.join(part));
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = store.get(&meta.location).await?.bytes().await?;
        debug!(object = %meta.location, local = %local_path.display(), "materialized feature file");
        tokio::fs::write(&local_path, bytes).await?;
    }

    info!(
        bucket = bucket_uri,
        features = objects.len(),
        topics = directive.topic_directives.len(),
        "fetched test package"
    );

    Ok(FetchedPackage {
        directive,
        feature_root,
        evidence_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_uri(dir: &std::path::Path) -> String {
        format!("file://{}", dir.display())
    }

    fn manifest() -> String {
        serde_json::json!({
            "bucket": "file:///unused",
            "jimfsLocation": "/work/features",
            "evidenceDir": "/work/evidence",
            "topicDirectives": [
                {"topic": "t-events", "role": "producer", "clientPrincipal": "svc"}
            ]
        })
        .to_string()
    }

    fn write_bucket(dir: &std::path::Path, with_manifest: bool, features: &[(&str, &str)]) {
        if with_manifest {
            std::fs::write(dir.join("topic-directive.yaml"), manifest()).unwrap();
        }
        for (relative, content) in features {
            let path = dir.join("features").join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }

    #[tokio::test]
    async fn fetches_manifest_and_feature_tree() {
        let bucket = tempfile::tempdir().unwrap();
        write_bucket(
            bucket.path(),
            true,
            &[
                ("ok.feature", "Feature: ok"),
                ("nested/deep.feature", "Feature: deep"),
            ],
        );
        let workspace = TestWorkspace::create().unwrap();

        let package = fetch_package(&bucket_uri(bucket.path()), "topic-directive.yaml", &workspace)
            .await
            .expect("fetch failed");

        assert_eq!(package.directive.topic_directives[0].topic, "t-events");
        // nesting preserved verbatim
        assert_eq!(
            std::fs::read_to_string(package.feature_root.join("ok.feature")).unwrap(),
            "Feature: ok"
        );
        assert_eq!(
            std::fs::read_to_string(package.feature_root.join("nested/deep.feature")).unwrap(),
            "Feature: deep"
        );
        assert!(package.evidence_dir.exists());
    }

    #[tokio::test]
    async fn missing_manifest_is_reported() {
        let bucket = tempfile::tempdir().unwrap();
        write_bucket(bucket.path(), false, &[("ok.feature", "Feature: ok")]);
        let workspace = TestWorkspace::create().unwrap();

        let result =
            fetch_package(&bucket_uri(bucket.path()), "topic-directive.yaml", &workspace).await;
        assert!(matches!(
            result,
            Err(StorageError::MissingTopicDirectiveFile(_))
        ));
    }

    #[tokio::test]
    async fn missing_features_directory_is_reported() {
        let bucket = tempfile::tempdir().unwrap();
        write_bucket(bucket.path(), true, &[]);
        let workspace = TestWorkspace::create().unwrap();

        let result =
            fetch_package(&bucket_uri(bucket.path()), "topic-directive.yaml", &workspace).await;
        assert!(matches!(result, Err(StorageError::MissingFeaturesDirectory)));
    }

    #[tokio::test]
    async fn unparseable_manifest_is_reported() {
        let bucket = tempfile::tempdir().unwrap();
        std::fs::write(bucket.path().join("topic-directive.yaml"), ": not yaml [").unwrap();
        std::fs::create_dir_all(bucket.path().join("features")).unwrap();
        std::fs::write(bucket.path().join("features/ok.feature"), "Feature: ok").unwrap();
        let workspace = TestWorkspace::create().unwrap();

        let result =
            fetch_package(&bucket_uri(bucket.path()), "topic-directive.yaml", &workspace).await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidTopicDirectiveFormat(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_topics_fail_validation_with_counts() {
        let bucket = tempfile::tempdir().unwrap();
        let manifest = serde_json::json!({
            "bucket": "file:///unused",
            "jimfsLocation": "/work/features",
            "evidenceDir": "/work/evidence",
            "topicDirectives": [
                {"topic": "t", "role": "producer", "clientPrincipal": "svc"},
                {"topic": "t", "role": "consumer", "clientPrincipal": "svc"}
            ]
        })
        .to_string();
        std::fs::write(bucket.path().join("topic-directive.yaml"), manifest).unwrap();
        std::fs::create_dir_all(bucket.path().join("features")).unwrap();
        std::fs::write(bucket.path().join("features/ok.feature"), "Feature: ok").unwrap();
        let workspace = TestWorkspace::create().unwrap();

        match fetch_package(&bucket_uri(bucket.path()), "topic-directive.yaml", &workspace).await {
            Err(StorageError::InvalidTopicDirectiveFormat(message)) => {
                assert!(message.contains("t appears 2 times"), "{}", message)
            }
            other => panic!("expected invalid directive, got {:?}", other.err()),
        }
    }
}
