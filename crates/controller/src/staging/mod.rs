//! Staging orchestration
//!
//! `StagingCoordinator::stage` validates a request, provisions storage and
//! submits the build run, then returns without waiting. Completion is
//! awaited separately through `completion::CompletionWatcher`.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use rand::RngCore;
use tracing::{info, instrument};

use crate::cluster::{from_dynamic, ClusterError, ResourceClient, ResourceKind};
use crate::config::StagingConfig;
use crate::error::{ApiError, Result};
use crate::models::{StageRef, StageRequest, StageResponse, NAMESPACE_LABEL_KEY, NAMESPACE_LABEL_VALUE};

pub mod application;
pub mod blob;
pub mod completion;
pub mod pipeline;
pub mod registry;
pub mod s3;
pub mod storage;
pub mod trust;

use blob::BlobStoreFactory;
use completion::CompletionWatcher;
use pipeline::StageParams;
use s3::S3ConnectionDetails;

/// Fresh stage id: 8 random bytes as 16 lowercase hex characters
#[must_use]
pub fn new_stage_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct StagingCoordinator {
    resources: Arc<dyn ResourceClient>,
    blobs: Arc<dyn BlobStoreFactory>,
    config: Arc<StagingConfig>,
}

impl StagingCoordinator {
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        blobs: Arc<dyn BlobStoreFactory>,
        config: Arc<StagingConfig>,
    ) -> Self {
        Self {
            resources,
            blobs,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Watcher over the same cluster, with the configured deadline
    #[must_use]
    pub fn completion_watcher(&self) -> CompletionWatcher {
        CompletionWatcher::new(
            Arc::clone(&self.resources),
            self.config.staging_namespace.clone(),
            self.config.timeouts.app_built(),
        )
    }

    /// Submit a staging run for `path_namespace/path_app`
    #[instrument(skip(self, request), fields(blob = %request.blob_uid))]
    pub async fn stage(
        &self,
        user: &str,
        path_namespace: &str,
        path_app: &str,
        request: StageRequest,
    ) -> Result<StageResponse> {
        if path_app != request.app.name {
            return Err(ApiError::bad_request(
                "name parameter from URL does not match name param in body",
            ));
        }
        if path_namespace != request.app.namespace {
            return Err(ApiError::bad_request(
                "namespace parameter from URL does not match namespace param in body",
            ));
        }
        if request.builder_image.trim().is_empty() {
            return Err(ApiError::bad_request("builder image cannot be empty"));
        }

        let app = request.app;
        let resources = self.resources.as_ref();
        let staging_namespace = self.config.staging_namespace.as_str();

        let app_object = application::get(resources, &app)
            .await
            .map_err(|e| ApiError::internal(e, "failed to get the application resource"))?
            .ok_or_else(|| {
                ApiError::not_found("cannot stage app, application resource is missing")
            })?;

        info!(%app, "Staging app");

        if application::currently_staging(resources, staging_namespace, &app)
            .await
            .map_err(|e| ApiError::internal(e, "failed to list pipeline runs"))?
        {
            return Err(ApiError::bad_request("pipelinerun for image ID still running"));
        }

        let s3 = self
            .s3_connection_details()
            .await
            .map_err(|e| ApiError::internal(e, "failed to fetch the S3 connection details"))?;
        let store = self
            .blobs
            .connect(&s3)
            .map_err(|e| ApiError::internal(e, "creating an S3 manager"))?;
        blob::validate_blob(store.as_ref(), &request.blob_uid, &app).await?;

        let stage = StageRef::new(new_stage_id());

        let environment = application::environment(resources, &app)
            .await
            .map_err(|e| ApiError::internal(e, "failed to access application runtime environment"))?;

        let registry_url = registry::public_registry_url(
            resources,
            staging_namespace,
            &self.config.registry_credentials_secret,
        )
        .await
        .map_err(|e| ApiError::internal(e, "getting the registry public URL"))?;

        let (registry_ca_secret, registry_ca_hash) =
            match self.config.registry_certificate_secret() {
                Some(secret) => {
                    let hash = trust::registry_certificate_hash(resources, staging_namespace, secret)
                        .await
                        .map_err(|e| ApiError::internal(e, "cannot calculate Certificate hash"))?;
                    (secret.to_string(), hash)
                }
                None => (String::new(), String::new()),
            };

        let params = StageParams {
            owner: application::Owner::of(&app_object),
            app,
            stage,
            blob_uid: request.blob_uid,
            builder_image: request.builder_image,
            environment,
            registry_url,
            s3,
            username: user.to_string(),
            registry_ca_secret,
            registry_ca_hash,
        };

        storage::ensure_claim(resources, staging_namespace, &params.app, &self.config.storage)
            .await
            .map_err(|e| {
                ApiError::internal(
                    e,
                    "failed to ensure a PersistentVolumeClaim for the application source and cache",
                )
            })?;

        let run = pipeline::build(&params, &self.config).to_object(resources.flavor());
        resources
            .create(ResourceKind::PipelineRun, staging_namespace, &run)
            .await
            .map_err(|e| ApiError::internal(e, "failed to create pipeline run"))?;

        let image_url = params.image_url();
        info!(
            app = %params.app,
            stage_id = %params.stage.id,
            image = %image_url,
            "Staged app"
        );

        Ok(StageResponse {
            stage: params.stage,
            image_url,
        })
    }

    /// Whether `namespace` exists and is under kiln control
    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        let Some(object) = self
            .resources
            .get(ResourceKind::Namespace, "", namespace)
            .await?
        else {
            return Ok(false);
        };
        let ns: Namespace = from_dynamic(ResourceKind::Namespace, &object)?;
        Ok(ns
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(NAMESPACE_LABEL_KEY))
            .is_some_and(|value| value == NAMESPACE_LABEL_VALUE))
    }

    async fn s3_connection_details(&self) -> anyhow::Result<S3ConnectionDetails> {
        let name = &self.config.s3_connection_secret;
        let object = self
            .resources
            .get(ResourceKind::Secret, &self.config.staging_namespace, name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("secret {name} not found"))?;
        let secret: Secret = from_dynamic(ResourceKind::Secret, &object)?;
        S3ConnectionDetails::from_secret(&secret)
    }
}
