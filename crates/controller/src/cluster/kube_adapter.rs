//! Live cluster adapter backed by `kube::Api<DynamicObject>`

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
use tracing::{debug, info};

use super::{ClusterError, PipelineFlavor, ResourceClient, ResourceKind};

#[derive(Clone)]
pub struct KubeResources {
    client: Client,
    flavor: PipelineFlavor,
}

impl KubeResources {
    #[must_use]
    pub fn new(client: Client, flavor: PipelineFlavor) -> Self {
        Self { client, flavor }
    }

    /// Build the adapter after asking the cluster which Tekton API it serves
    pub async fn detect(client: Client) -> Result<Self, ClusterError> {
        let group = kube::discovery::group(&client, "tekton.dev").await?;
        let flavor = PipelineFlavor::from_versions(group.versions());
        info!(
            api_version = flavor.api_version(),
            "Detected pipeline engine API"
        );
        Ok(Self::new(client, flavor))
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let resource = kind.api_resource(self.flavor);
        if kind.is_namespaced() {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResources {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.api(kind, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        match self
            .api(kind, namespace)
            .create(&PostParams::default(), object)
            .await
        {
            Ok(created) => {
                debug!(%kind, %namespace, %name, "Created resource");
                Ok(created)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(ClusterError::AlreadyExists { kind, name })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api(kind, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(ClusterError::NotFound {
                kind,
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn flavor(&self) -> PipelineFlavor {
        self.flavor
    }
}
