//! Staging Controller Configuration
//!
//! Explicit configuration handed to the coordinator and the completion
//! watcher at construction time. Loaded from the mounted config file, with a
//! couple of environment overrides for values commonly tweaked per cluster.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main staging configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Namespace holding pipeline runs, claims and staging secrets
    #[serde(default = "default_staging_namespace", rename = "stagingNamespace")]
    pub staging_namespace: String,

    /// Tekton pipeline every run references
    #[serde(default = "default_pipeline_name", rename = "pipelineName")]
    pub pipeline_name: String,

    /// ServiceAccount the staging task pods run as
    #[serde(default = "default_service_account", rename = "serviceAccountName")]
    pub service_account_name: String,

    /// Secret with the object store connection details
    #[serde(default = "default_s3_secret", rename = "s3ConnectionSecret")]
    pub s3_connection_secret: String,

    /// Secret (dockerconfigjson) with registry credentials and URLs
    #[serde(default = "default_registry_secret", rename = "registryCredentialsSecret")]
    pub registry_credentials_secret: String,

    /// Secret with the registry TLS certificate; unset disables trust parameters
    #[serde(default, rename = "registryCertificateSecret")]
    pub registry_certificate_secret: Option<String>,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Timeout configuration
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Storage configuration for the per-application claim
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Requested claim capacity
    #[serde(default = "default_claim_size", rename = "claimSize")]
    pub claim_size: String,

    /// Storage class; `None` lets the cluster default apply
    #[serde(default, rename = "storageClassName")]
    pub storage_class_name: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            claim_size: default_claim_size(),
            storage_class_name: None,
        }
    }
}

/// Timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Base deadline for a staging run to complete
    #[serde(default = "default_app_built_seconds", rename = "appBuiltSeconds")]
    pub app_built_seconds: u64,

    /// Scales every timeout, for slow clusters
    #[serde(default = "default_multiplier")]
    pub multiplier: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            app_built_seconds: default_app_built_seconds(),
            multiplier: default_multiplier(),
        }
    }
}

impl TimeoutConfig {
    /// Deadline for the completion watcher
    #[must_use]
    pub fn app_built(&self) -> Duration {
        Duration::from_secs(self.app_built_seconds.saturating_mul(self.multiplier))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address", rename = "listenAddress")]
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

fn default_staging_namespace() -> String {
    "tekton-staging".to_string()
}

fn default_pipeline_name() -> String {
    "staging-pipeline".to_string()
}

fn default_service_account() -> String {
    "staging-triggers-admin".to_string()
}

fn default_s3_secret() -> String {
    "kiln-s3-connection-details".to_string()
}

fn default_registry_secret() -> String {
    "registry-creds".to_string()
}

fn default_claim_size() -> String {
    "1Gi".to_string()
}

fn default_app_built_seconds() -> u64 {
    600
}

fn default_multiplier() -> u64 {
    1
}

fn default_listen_address() -> String {
    "0.0.0.0:8030".to_string()
}

impl StagingConfig {
    /// Validate that required fields hold usable values
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let required = [
            ("stagingNamespace", &self.staging_namespace),
            ("pipelineName", &self.pipeline_name),
            ("serviceAccountName", &self.service_account_name),
            ("s3ConnectionSecret", &self.s3_connection_secret),
            ("registryCredentialsSecret", &self.registry_credentials_secret),
            ("storage.claimSize", &self.storage.claim_size),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("configuration field {field} must not be empty"));
            }
        }

        if self.timeouts.app_built_seconds == 0 || self.timeouts.multiplier == 0 {
            return Err(anyhow::anyhow!(
                "timeouts.appBuiltSeconds and timeouts.multiplier must be positive"
            ));
        }

        Ok(())
    }

    /// Load configuration from mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let mut config: StagingConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment overrides on top of file or default values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("KILN_REGISTRY_CERTIFICATE_SECRET") {
            self.registry_certificate_secret = Some(secret);
        }
        if let Some(multiplier) = std::env::var("KILN_TIMEOUT_MULTIPLIER")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            self.timeouts.multiplier = multiplier;
        }
    }

    /// The trust secret, if one is configured with a non-empty name
    #[must_use]
    pub fn registry_certificate_secret(&self) -> Option<&str> {
        self.registry_certificate_secret
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            staging_namespace: default_staging_namespace(),
            pipeline_name: default_pipeline_name(),
            service_account_name: default_service_account(),
            s3_connection_secret: default_s3_secret(),
            registry_credentials_secret: default_registry_secret(),
            registry_certificate_secret: None,
            storage: StorageConfig::default(),
            timeouts: TimeoutConfig::default(),
            server: ServerConfig::default(),
        }
    }
}
