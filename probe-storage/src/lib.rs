//! Block-storage child: fetches one test package (manifest + feature tree)
//! into a scratch workspace and uploads evidence back out. Providers (S3,
//! Azure Blob, GCS, local filesystem) are interchangeable behind
//! `object_store`; the rest of the probe only sees the two operations here.

pub mod bucket;
pub mod error;
pub mod fetch;
pub mod upload;
pub mod workspace;

pub use error::StorageError;
pub use fetch::{fetch_package, FetchedPackage};
pub use upload::upload_evidence;
pub use workspace::TestWorkspace;
