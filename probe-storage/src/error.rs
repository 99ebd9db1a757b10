use thiserror::Error;

/// Enumeration of errors for block-storage operations scoped to one test.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to parse bucket uri {uri}: {message}")]
    BucketUriParse { uri: String, message: String },
    #[error("test package has no features directory or it is empty")]
    MissingFeaturesDirectory,
    #[error("test package has no {0} manifest")]
    MissingTopicDirectiveFile(String),
    #[error("invalid topic directive: {0}")]
    InvalidTopicDirectiveFormat(String),
    #[error("block storage error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Machine-readable kind string surfaced in terminal test status.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::BucketUriParse { .. } => "BucketUriParse",
            StorageError::MissingFeaturesDirectory => "MissingFeaturesDirectory",
            StorageError::MissingTopicDirectiveFile(_) => "MissingTopicDirectiveFile",
            StorageError::InvalidTopicDirectiveFormat(_) => "InvalidTopicDirectiveFormat",
            StorageError::ObjectStore(_) => "BlockStorage",
            StorageError::Io(_) => "BlockStorageIo",
        }
    }
}
