//! Request, response and naming types shared by the staging endpoints

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Label carrying the stage id on every pipeline run
pub const STAGE_ID_LABEL: &str = "kiln.dev/stage-id";
/// Label carrying the source blob id on every pipeline run
pub const STAGE_BLOB_UID_LABEL: &str = "kiln.dev/blob-uid";
/// Marks namespaces under kiln control
pub const NAMESPACE_LABEL_KEY: &str = "kiln.dev/namespace";
pub const NAMESPACE_LABEL_VALUE: &str = "true";

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const CREATED_BY_LABEL: &str = "app.kubernetes.io/created-by";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

const MAX_RESOURCE_NAME: usize = 63;

/// Reference to an application within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRef {
    pub name: String,
    pub namespace: String,
}

impl AppRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Name of the claim backing source uploads and the build cache
    #[must_use]
    pub fn pvc_name(&self) -> String {
        resource_name(&[&self.namespace, &self.name])
    }

    /// Name of the secret holding the application environment
    #[must_use]
    pub fn env_secret_name(&self) -> String {
        resource_name(&[&self.name, "env"])
    }
}

impl std::fmt::Display for AppRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Build a DNS-1123 compliant name from parts.
///
/// Names longer than 63 characters keep a prefix and gain a hash suffix
/// of the full input, so distinct inputs stay distinct.
#[must_use]
pub fn resource_name(parts: &[&str]) -> String {
    let joined = parts.join("-");
    let mut sanitized: String = joined
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    sanitized = sanitized.trim_matches('-').to_string();

    if sanitized.len() <= MAX_RESOURCE_NAME {
        return sanitized;
    }

    let digest = hex::encode(Sha1::digest(joined.as_bytes()));
    let suffix = &digest[..16];
    let keep = MAX_RESOURCE_NAME - suffix.len() - 1;
    let prefix = sanitized[..keep].trim_end_matches('-');
    format!("{prefix}-{suffix}")
}

/// Identity of one staging attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRef {
    pub id: String,
}

impl StageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Body of the stage endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    pub app: AppRef,
    #[serde(rename = "blobuid")]
    pub blob_uid: String,
    #[serde(rename = "builderimage")]
    pub builder_image: String,
}

/// Answer of the stage endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResponse {
    pub stage: StageRef,
    #[serde(rename = "image")]
    pub image_url: String,
}

/// One application environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    pub name: String,
    pub value: String,
}

/// Application environment, ordered by variable name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariableList(pub Vec<EnvVariable>);

impl EnvVariableList {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars: Vec<EnvVariable> = pairs
            .into_iter()
            .map(|(name, value)| EnvVariable {
                name: name.into(),
                value: value.into(),
            })
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        Self(vars)
    }

    /// `NAME=VALUE` entries handed to the build step
    #[must_use]
    pub fn staging_env_array(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|var| format!("{}={}", var.name, var.value))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
