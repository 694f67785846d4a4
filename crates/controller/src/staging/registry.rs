//! Public registry URL from the registry credentials secret
//!
//! The secret is a `kubernetes.io/dockerconfigjson` secret. Its `auths` map
//! usually lists an in-cluster localhost mirror next to the public host;
//! images are tagged with the public one.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use k8s_openapi::api::core::v1::Secret;
use serde::Deserialize;

use crate::cluster::{from_dynamic, ResourceClient, ResourceKind};

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
const NAMESPACE_KEY: &str = "namespace";

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, serde_json::Value>,
}

/// Registry connection details relevant to image naming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDetails {
    pub hosts: Vec<String>,
    /// Optional organisation or project prefix inside the registry
    pub namespace: String,
}

impl RegistryDetails {
    pub fn from_secret(secret: &Secret) -> anyhow::Result<Self> {
        let data = secret
            .data
            .as_ref()
            .ok_or_else(|| anyhow!("registry secret has no data"))?;
        let raw = data
            .get(DOCKER_CONFIG_KEY)
            .ok_or_else(|| anyhow!("registry secret is missing {DOCKER_CONFIG_KEY}"))?;
        let config: DockerConfig =
            serde_json::from_slice(&raw.0).context("parsing docker config json")?;

        let namespace = data
            .get(NAMESPACE_KEY)
            .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
            .unwrap_or_default();

        Ok(Self {
            hosts: config.auths.into_keys().collect(),
            namespace,
        })
    }

    /// First host that is not a local mirror
    #[must_use]
    pub fn public_host(&self) -> Option<&str> {
        self.hosts
            .iter()
            .map(String::as_str)
            .find(|host| !is_local(host))
    }

    /// `host[/namespace]` used as the image prefix
    pub fn public_url(&self) -> anyhow::Result<String> {
        let host = self
            .public_host()
            .ok_or_else(|| anyhow!("no public registry URL found"))?;
        let host = host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if self.namespace.is_empty() {
            Ok(host.to_string())
        } else {
            Ok(format!("{host}/{}", self.namespace))
        }
    }
}

fn is_local(host: &str) -> bool {
    let bare = host
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let name = bare.split([':', '/']).next().unwrap_or_default();
    name == "localhost" || name == "127.0.0.1"
}

/// Read the credentials secret and derive the public registry URL
pub async fn public_registry_url(
    resources: &dyn ResourceClient,
    namespace: &str,
    secret_name: &str,
) -> anyhow::Result<String> {
    let object = resources
        .get(ResourceKind::Secret, namespace, secret_name)
        .await?
        .ok_or_else(|| anyhow!("registry secret {secret_name} not found"))?;
    let secret: Secret = from_dynamic(ResourceKind::Secret, &object)?;
    RegistryDetails::from_secret(&secret)?.public_url()
}
