//! In-process resource store
//!
//! Behaves like the API server for the verbs staging uses: create refuses
//! duplicates, list filters on equality label selectors, and created objects
//! get a uid and a creation timestamp. Used by tests and local dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use rand::RngCore;

use super::{ClusterError, PipelineFlavor, ResourceClient, ResourceKind};

type Key = (ResourceKind, String, String);

#[derive(Default)]
pub struct MemoryResources {
    objects: Mutex<BTreeMap<Key, DynamicObject>>,
    flavor: PipelineFlavor,
}

impl MemoryResources {
    #[must_use]
    pub fn new(flavor: PipelineFlavor) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            flavor,
        }
    }

    /// Insert or replace an object without create semantics
    pub fn insert(&self, kind: ResourceKind, namespace: &str, mut object: DynamicObject) {
        let name = object.metadata.name.clone().unwrap_or_default();
        if kind.is_namespaced() {
            object.metadata.namespace = Some(namespace.to_string());
        }
        self.lock().insert(key(kind, namespace, &name), object);
    }

    /// Mutate a stored object in place; returns false when it does not exist
    pub fn update<F>(&self, kind: ResourceKind, namespace: &str, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut DynamicObject),
    {
        match self.lock().get_mut(&key(kind, namespace, name)) {
            Some(object) => {
                f(object);
                true
            }
            None => false,
        }
    }

    /// Number of stored objects of a kind in a namespace
    #[must_use]
    pub fn count(&self, kind: ResourceKind, namespace: &str) -> usize {
        let scope = scope_of(kind, namespace);
        self.lock()
            .keys()
            .filter(|(k, ns, _)| *k == kind && *ns == scope)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, DynamicObject>> {
        // A poisoned lock only means another test thread panicked mid-update
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn scope_of(kind: ResourceKind, namespace: &str) -> String {
    if kind.is_namespaced() {
        namespace.to_string()
    } else {
        String::new()
    }
}

fn key(kind: ResourceKind, namespace: &str, name: &str) -> Key {
    (kind, scope_of(kind, namespace), name.to_string())
}

/// Match `k=v,k2=v2`; an empty selector matches everything
fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl ResourceClient for MemoryResources {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.lock().get(&key(kind, namespace, name)).cloned())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::Malformed {
                kind,
                message: "metadata.name is required".to_string(),
            })?;

        let mut objects = self.lock();
        let k = key(kind, namespace, &name);
        if objects.contains_key(&k) {
            return Err(ClusterError::AlreadyExists { kind, name });
        }

        let mut created = object.clone();
        if kind.is_namespaced() {
            created.metadata.namespace = Some(namespace.to_string());
        }
        let mut uid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut uid);
        created.metadata.uid = Some(hex::encode(uid));
        created.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));

        objects.insert(k, created.clone());
        Ok(created)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let scope = scope_of(kind, namespace);
        Ok(self
            .lock()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && *ns == scope)
            .map(|(_, object)| object)
            .filter(|object| matches_selector(object, label_selector))
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        match self.lock().remove(&key(kind, namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    fn flavor(&self) -> PipelineFlavor {
        self.flavor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn labeled(name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let ar = ResourceKind::PipelineRun.api_resource(PipelineFlavor::V1);
        let mut object = DynamicObject::new(name, &ar);
        object.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        object
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let store = MemoryResources::default();
        let object = labeled("run-1", &[]);

        let created = store
            .create(ResourceKind::PipelineRun, "staging", &object)
            .await
            .unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.namespace.as_deref(), Some("staging"));

        let err = store
            .create(ResourceKind::PipelineRun, "staging", &object)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryResources::default();
        store.insert(ResourceKind::PipelineRun, "a", labeled("one", &[("stage", "1"), ("app", "x")]));
        store.insert(ResourceKind::PipelineRun, "a", labeled("two", &[("stage", "2"), ("app", "x")]));
        store.insert(ResourceKind::PipelineRun, "b", labeled("three", &[("stage", "1")]));

        let found = store
            .list(ResourceKind::PipelineRun, "a", "stage=1,app=x")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("one"));

        let all = store.list(ResourceKind::PipelineRun, "a", "").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryResources::default();
        let err = store
            .delete(ResourceKind::Secret, "a", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotFound { .. }));
    }
}
