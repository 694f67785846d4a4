//! Application lookups used while staging

use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;

use crate::cluster::{from_dynamic, ClusterError, ResourceClient, ResourceKind};
use crate::models::{AppRef, EnvVariableList, APP_NAME_LABEL, APP_PART_OF_LABEL};

/// Identity of the application resource a run belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl Owner {
    #[must_use]
    pub fn of(object: &DynamicObject) -> Self {
        let (api_version, kind) = object
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        Self {
            api_version,
            kind,
            name: object.metadata.name.clone().unwrap_or_default(),
            uid: object.metadata.uid.clone().unwrap_or_default(),
        }
    }
}

/// The application resource, `None` when it does not exist
pub async fn get(
    resources: &dyn ResourceClient,
    app: &AppRef,
) -> Result<Option<DynamicObject>, ClusterError> {
    resources
        .get(ResourceKind::Application, &app.namespace, &app.name)
        .await
}

/// Environment variables from the `<app>-env` secret; no secret, no variables
pub async fn environment(
    resources: &dyn ResourceClient,
    app: &AppRef,
) -> Result<EnvVariableList, ClusterError> {
    let Some(object) = resources
        .get(ResourceKind::Secret, &app.namespace, &app.env_secret_name())
        .await?
    else {
        return Ok(EnvVariableList::default());
    };

    let secret: Secret = from_dynamic(ResourceKind::Secret, &object)?;
    let pairs = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, String::from_utf8_lossy(&value.0).into_owned()));
    Ok(EnvVariableList::from_pairs(pairs))
}

/// Whether any staging run for the app has not completed yet
pub async fn currently_staging(
    resources: &dyn ResourceClient,
    staging_namespace: &str,
    app: &AppRef,
) -> Result<bool, ClusterError> {
    let selector = format!(
        "{APP_NAME_LABEL}={},{APP_PART_OF_LABEL}={}",
        app.name, app.namespace
    );
    let runs = resources
        .list(ResourceKind::PipelineRun, staging_namespace, &selector)
        .await?;
    Ok(runs.iter().any(|run| completion_time(run).is_none()))
}

pub(crate) fn completion_time(run: &DynamicObject) -> Option<&str> {
    run.data
        .get("status")
        .and_then(|status| status.get("completionTime"))
        .and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{to_dynamic, MemoryResources, PipelineFlavor};
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn run(name: &str, app: &str, namespace: &str, completed: bool) -> DynamicObject {
        let ar = ResourceKind::PipelineRun.api_resource(PipelineFlavor::V1);
        let mut object = DynamicObject::new(name, &ar);
        object.metadata.labels = Some(BTreeMap::from([
            (APP_NAME_LABEL.to_string(), app.to_string()),
            (APP_PART_OF_LABEL.to_string(), namespace.to_string()),
        ]));
        if completed {
            object.data = serde_json::json!({
                "status": {"completionTime": "2024-05-01T12:00:00Z"}
            });
        }
        object
    }

    #[tokio::test]
    async fn running_run_means_staging() {
        let store = MemoryResources::default();
        let app = AppRef::new("hello", "ws1");
        store.insert(ResourceKind::PipelineRun, "tekton-staging", run("a", "hello", "ws1", true));
        assert!(!currently_staging(&store, "tekton-staging", &app).await.unwrap());

        store.insert(ResourceKind::PipelineRun, "tekton-staging", run("b", "hello", "ws1", false));
        assert!(currently_staging(&store, "tekton-staging", &app).await.unwrap());
    }

    #[tokio::test]
    async fn other_apps_do_not_count() {
        let store = MemoryResources::default();
        store.insert(ResourceKind::PipelineRun, "tekton-staging", run("a", "hello", "ws2", false));
        store.insert(ResourceKind::PipelineRun, "tekton-staging", run("b", "bye", "ws1", false));

        let app = AppRef::new("hello", "ws1");
        assert!(!currently_staging(&store, "tekton-staging", &app).await.unwrap());
    }

    #[tokio::test]
    async fn environment_comes_from_env_secret() {
        let store = MemoryResources::default();
        let app = AppRef::new("hello", "ws1");
        assert!(environment(&store, &app).await.unwrap().is_empty());

        let mut secret = Secret::default();
        secret.metadata.name = Some("hello-env".to_string());
        secret.data = Some(BTreeMap::from([
            ("PORT".to_string(), ByteString(b"8080".to_vec())),
            ("MODE".to_string(), ByteString(b"prod".to_vec())),
        ]));
        store.insert(
            ResourceKind::Secret,
            "ws1",
            to_dynamic(ResourceKind::Secret, &secret).unwrap(),
        );

        let env = environment(&store, &app).await.unwrap();
        assert_eq!(env.staging_env_array(), vec!["MODE=prod", "PORT=8080"]);
    }

    #[test]
    fn owner_reads_type_and_identity() {
        let ar = ResourceKind::Application.api_resource(PipelineFlavor::V1);
        let mut object = DynamicObject::new("hello", &ar);
        object.metadata.uid = Some("u-1".to_string());

        let owner = Owner::of(&object);
        assert_eq!(owner.api_version, "application.kiln.dev/v1");
        assert_eq!(owner.kind, "App");
        assert_eq!(owner.name, "hello");
        assert_eq!(owner.uid, "u-1");
    }
}
