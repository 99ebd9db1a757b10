use std::sync::Arc;

use object_store::path::Path;
use object_store::ObjectStore;
use url::Url;

use crate::error::StorageError;

/// Resolve a bucket URI (`s3://`, `az://`, `gs://`, `file://`) into a store
/// handle and the prefix inside it. Provider credentials come from the
/// ambient environment (IAM role, workload identity), never from the URI.
pub fn open_bucket(uri: &str) -> Result<(Arc<dyn ObjectStore>, Path), StorageError> {
    let url = Url::parse(uri).map_err(|e| StorageError::BucketUriParse {
        uri: uri.to_string(),
        message: e.to_string(),
    })?;

    let (store, prefix) =
        object_store::parse_url(&url).map_err(|e| StorageError::BucketUriParse {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

    Ok((Arc::from(store), prefix))
}

#[cfg(test)]
mod tests {
    use super::open_bucket;
    use crate::error::StorageError;

    #[test]
    fn parses_file_uris() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let uri = format!("file://{}", dir.path().display());
        let (_, prefix) = open_bucket(&uri).expect("failed to open bucket");
        assert!(!prefix.as_ref().is_empty());
    }

    #[test]
    fn rejects_malformed_uris() {
        for uri in ["not a uri", "://missing-scheme", "unknown-scheme://x/y"] {
            match open_bucket(uri) {
                Err(StorageError::BucketUriParse { .. }) => {}
                other => panic!("expected BucketUriParse for {}, got {:?}", uri, other.err()),
            }
        }
    }
}
