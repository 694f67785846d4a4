//! Blob ownership validation

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{ApiError, Result};
use crate::models::AppRef;
use crate::staging::s3::S3ConnectionDetails;

/// Metadata key recording the owning application
pub const META_APP: &str = "app";
/// Metadata key recording the owning namespace
pub const META_NAMESPACE: &str = "namespace";

/// Read access to uploaded blob metadata. Keys are lowercase.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn meta(&self, blob_uid: &str) -> anyhow::Result<HashMap<String, String>>;
}

/// Opens a blob store for a set of connection details
pub trait BlobStoreFactory: Send + Sync {
    fn connect(&self, details: &S3ConnectionDetails) -> anyhow::Result<Box<dyn BlobStore>>;
}

/// Fail unless the blob was uploaded for exactly this application
pub async fn validate_blob(store: &dyn BlobStore, blob_uid: &str, app: &AppRef) -> Result<()> {
    let meta = store
        .meta(blob_uid)
        .await
        .map_err(|e| ApiError::internal(e, "querying blob id meta-data"))?;

    let blob_app = meta
        .get(META_APP)
        .ok_or_else(|| ApiError::internal_msg("blob has no app name meta data"))?;
    if blob_app != &app.name {
        return Err(ApiError::bad_request("blob app mismatch")
            .with_detail(format!("expected: {}", app.name))
            .with_detail(format!("found: {blob_app}")));
    }

    let blob_namespace = meta
        .get(META_NAMESPACE)
        .ok_or_else(|| ApiError::internal_msg("blob has no namespace meta data"))?;
    if blob_namespace != &app.namespace {
        return Err(ApiError::bad_request("blob namespace mismatch")
            .with_detail(format!("expected: {}", app.namespace))
            .with_detail(format!("found: {blob_namespace}")));
    }

    Ok(())
}
