//! PipelineRun rendering
//!
//! `build` is a pure function of the staging parameters and the
//! configuration. The resulting descriptor renders to either Tekton API
//! generation.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde::Serialize;
use serde_json::json;

use crate::cluster::{PipelineFlavor, ResourceKind};
use crate::config::StagingConfig;
use crate::models::{
    AppRef, EnvVariableList, StageRef, APP_NAME_LABEL, APP_PART_OF_LABEL, COMPONENT_LABEL,
    CREATED_BY_LABEL, MANAGED_BY_LABEL, STAGE_BLOB_UID_LABEL, STAGE_ID_LABEL,
};
use crate::staging::application::Owner;
use crate::staging::s3::S3ConnectionDetails;

pub const OWNER_API_VERSION_ANNOTATION: &str = "kiln.dev/owner-api-version";
pub const OWNER_KIND_ANNOTATION: &str = "kiln.dev/owner-kind";
pub const OWNER_NAME_ANNOTATION: &str = "kiln.dev/owner-name";
pub const OWNER_UID_ANNOTATION: &str = "kiln.dev/owner-uid";

/// Everything a run is rendered from
#[derive(Debug, Clone)]
pub struct StageParams {
    pub app: AppRef,
    pub stage: StageRef,
    pub blob_uid: String,
    pub builder_image: String,
    pub environment: EnvVariableList,
    pub owner: Owner,
    pub registry_url: String,
    pub s3: S3ConnectionDetails,
    pub username: String,
    pub registry_ca_secret: String,
    pub registry_ca_hash: String,
}

impl StageParams {
    /// Tag of the image the run will push
    #[must_use]
    pub fn image_url(&self) -> String {
        format!(
            "{}/{}-{}:{}",
            self.registry_url, self.app.namespace, self.app.name, self.stage.id
        )
    }

    fn trusts_registry_ca(&self) -> bool {
        !self.registry_ca_secret.is_empty() && !self.registry_ca_hash.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Array(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    fn string(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: ParamValue::String(value.into()),
        }
    }

    fn array(name: &str, values: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            value: ParamValue::Array(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSource {
    pub claim_name: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyToPath {
    pub key: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    pub secret_name: String,
    pub items: Vec<KeyToPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretSource>,
}

impl WorkspaceBinding {
    fn claim(name: &str, claim_name: &str) -> Self {
        Self {
            name: name.to_string(),
            sub_path: Some(name.to_string()),
            persistent_volume_claim: Some(ClaimSource {
                claim_name: claim_name.to_string(),
                read_only: false,
            }),
            secret: None,
        }
    }

    fn secret(name: &str, secret_name: &str, keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            sub_path: None,
            persistent_volume_claim: None,
            secret: Some(SecretSource {
                secret_name: secret_name.to_string(),
                items: keys
                    .iter()
                    .map(|k| KeyToPath {
                        key: (*k).to_string(),
                        path: (*k).to_string(),
                    })
                    .collect(),
            }),
        }
    }
}

/// Engine-independent description of one staging run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRunDescriptor {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub pipeline_name: String,
    pub service_account_name: String,
    pub params: Vec<Param>,
    pub workspaces: Vec<WorkspaceBinding>,
}

impl PipelineRunDescriptor {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Render as a `PipelineRun` of the given API generation
    #[must_use]
    pub fn to_object(&self, flavor: PipelineFlavor) -> DynamicObject {
        let resource = ResourceKind::PipelineRun.api_resource(flavor);
        let mut object = DynamicObject::new(&self.name, &resource);
        object.metadata.labels = Some(self.labels.clone());
        object.metadata.annotations = Some(self.annotations.clone());

        let mut spec = json!({
            "pipelineRef": { "name": self.pipeline_name },
            "params": self.params,
            "workspaces": self.workspaces,
        });
        match flavor {
            PipelineFlavor::V1 => {
                spec["taskRunTemplate"] = json!({ "serviceAccountName": self.service_account_name });
            }
            PipelineFlavor::V1Beta1 => {
                spec["serviceAccountName"] = json!(self.service_account_name);
            }
        }
        object.data = json!({ "spec": spec });
        object
    }
}

/// Render the run for one staging attempt
#[must_use]
pub fn build(params: &StageParams, config: &StagingConfig) -> PipelineRunDescriptor {
    let s3 = &params.s3;
    let storage_script = format!(
        "aws --endpoint-url {}://$1 s3 cp s3://$2/$3 $(workspaces.source.path)/$3",
        s3.protocol()
    );
    let storage_args = vec![
        s3.endpoint.clone(),
        s3.bucket.clone(),
        params.blob_uid.clone(),
    ];

    let mut run_params = vec![
        Param::string("APP_IMAGE", params.image_url()),
        Param::string("BUILDER_IMAGE", params.builder_image.clone()),
        Param::array("ENV_VARS", params.environment.staging_env_array()),
        Param::string("STORAGE_SCRIPT", storage_script),
        Param::array("STORAGE_ARGS", storage_args),
    ];
    if params.trusts_registry_ca() {
        run_params.push(Param::string(
            "REGISTRY_CERTIFICATE_SECRET",
            params.registry_ca_secret.clone(),
        ));
        run_params.push(Param::string(
            "REGISTRY_CERTIFICATE_HASH",
            params.registry_ca_hash.clone(),
        ));
    }

    let labels = BTreeMap::from([
        (APP_NAME_LABEL.to_string(), params.app.name.clone()),
        (APP_PART_OF_LABEL.to_string(), params.app.namespace.clone()),
        (CREATED_BY_LABEL.to_string(), params.username.clone()),
        (MANAGED_BY_LABEL.to_string(), "kiln".to_string()),
        (COMPONENT_LABEL.to_string(), "staging".to_string()),
        (STAGE_ID_LABEL.to_string(), params.stage.id.clone()),
        (STAGE_BLOB_UID_LABEL.to_string(), params.blob_uid.clone()),
    ]);

    let annotations = BTreeMap::from([
        (
            OWNER_API_VERSION_ANNOTATION.to_string(),
            params.owner.api_version.clone(),
        ),
        (OWNER_KIND_ANNOTATION.to_string(), params.owner.kind.clone()),
        (OWNER_NAME_ANNOTATION.to_string(), params.owner.name.clone()),
        (OWNER_UID_ANNOTATION.to_string(), params.owner.uid.clone()),
    ]);

    let claim = params.app.pvc_name();
    PipelineRunDescriptor {
        name: params.stage.id.clone(),
        labels,
        annotations,
        pipeline_name: config.pipeline_name.clone(),
        service_account_name: config.service_account_name.clone(),
        params: run_params,
        workspaces: vec![
            WorkspaceBinding::claim("cache", &claim),
            WorkspaceBinding::claim("source", &claim),
            WorkspaceBinding::secret(
                "s3secret",
                &config.s3_connection_secret,
                &["config", "credentials"],
            ),
        ],
    }
}
