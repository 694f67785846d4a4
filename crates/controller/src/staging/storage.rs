//! Per-application claim for uploaded sources and the build cache

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::cluster::{to_dynamic, ClusterError, ResourceClient, ResourceKind};
use crate::config::StorageConfig;
use crate::models::{AppRef, MANAGED_BY_LABEL};

/// Make sure the claim for `app` exists in the staging namespace.
///
/// Losing a create race to a concurrent request is fine: the claim exists
/// either way.
pub async fn ensure_claim(
    resources: &dyn ResourceClient,
    staging_namespace: &str,
    app: &AppRef,
    storage: &StorageConfig,
) -> Result<(), ClusterError> {
    let name = app.pvc_name();
    if resources
        .get(ResourceKind::PersistentVolumeClaim, staging_namespace, &name)
        .await?
        .is_some()
    {
        debug!(claim = %name, "Claim already exists");
        return Ok(());
    }

    let claim = claim_for(&name, staging_namespace, storage);
    let object = to_dynamic(ResourceKind::PersistentVolumeClaim, &claim)?;
    match resources
        .create(ResourceKind::PersistentVolumeClaim, staging_namespace, &object)
        .await
    {
        Ok(_) => {
            info!(claim = %name, size = %storage.claim_size, "Created claim");
            Ok(())
        }
        Err(ClusterError::AlreadyExists { .. }) => {
            debug!(claim = %name, "Claim was created concurrently");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn claim_for(name: &str, namespace: &str, storage: &StorageConfig) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(storage.claim_size.clone()));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                "kiln".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            storage_class_name: storage.storage_class_name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
