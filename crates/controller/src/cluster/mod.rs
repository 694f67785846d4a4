//! Cluster resource capability
//!
//! Staging only needs four verbs on a handful of resource kinds. They are
//! expressed as one small trait over `DynamicObject` so the coordinator does
//! not care whether it talks to a live API server or an in-process store.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Secret};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub mod kube_adapter;
pub mod memory;

pub use kube_adapter::KubeResources;
pub use memory::MemoryResources;

/// Errors that can occur during resource operations
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("malformed {kind} object: {message}")]
    Malformed { kind: ResourceKind, message: String },
}

/// Resource kinds the staging core touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Namespace,
    Secret,
    PersistentVolumeClaim,
    Application,
    PipelineRun,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Application => "App",
            Self::PipelineRun => "PipelineRun",
        };
        f.write_str(name)
    }
}

impl ResourceKind {
    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(self, Self::Namespace)
    }

    /// API coordinates of this kind; only pipeline runs depend on the flavor
    #[must_use]
    pub fn api_resource(self, flavor: PipelineFlavor) -> ApiResource {
        match self {
            Self::Namespace => ApiResource::erase::<Namespace>(&()),
            Self::Secret => ApiResource::erase::<Secret>(&()),
            Self::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
            Self::Application => ApiResource {
                group: "application.kiln.dev".to_string(),
                version: "v1".to_string(),
                api_version: "application.kiln.dev/v1".to_string(),
                kind: "App".to_string(),
                plural: "apps".to_string(),
            },
            Self::PipelineRun => ApiResource {
                group: "tekton.dev".to_string(),
                version: flavor.version().to_string(),
                api_version: flavor.api_version().to_string(),
                kind: "PipelineRun".to_string(),
                plural: "pipelineruns".to_string(),
            },
        }
    }
}

/// Tekton API generation served by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineFlavor {
    /// `tekton.dev/v1`, service account under `taskRunTemplate`
    #[default]
    V1,
    /// `tekton.dev/v1beta1`, service account at the spec root
    V1Beta1,
}

impl PipelineFlavor {
    #[must_use]
    pub fn version(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V1Beta1 => "v1beta1",
        }
    }

    #[must_use]
    pub fn api_version(self) -> &'static str {
        match self {
            Self::V1 => "tekton.dev/v1",
            Self::V1Beta1 => "tekton.dev/v1beta1",
        }
    }

    /// Pick the flavor from the versions a cluster advertises for `tekton.dev`
    pub fn from_versions<'a>(mut versions: impl Iterator<Item = &'a str>) -> Self {
        if versions.any(|v| v == "v1") {
            Self::V1
        } else {
            Self::V1Beta1
        }
    }
}

/// Get/create/list/delete on typed resources within a namespace.
///
/// Cluster scoped kinds ignore the namespace argument.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// Create an object; an existing object yields `ClusterError::AlreadyExists`
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// List objects matching an equality label selector (`k=v,k2=v2`)
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<(), ClusterError>;

    /// Pipeline API generation used for `ResourceKind::PipelineRun`
    fn flavor(&self) -> PipelineFlavor;
}

/// Convert a typed object into its dynamic form
pub fn to_dynamic<K: Serialize>(kind: ResourceKind, object: &K) -> Result<DynamicObject, ClusterError> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| ClusterError::Malformed {
            kind,
            message: e.to_string(),
        })
}

/// Convert a dynamic object into a typed one
pub fn from_dynamic<K: DeserializeOwned>(
    kind: ResourceKind,
    object: &DynamicObject,
) -> Result<K, ClusterError> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| ClusterError::Malformed {
            kind,
            message: e.to_string(),
        })
}
