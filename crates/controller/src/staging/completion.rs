//! Waiting for a staging run to finish
//!
//! A run moves `Running -> {Succeeded, Failed, TimedOut}`. `observe` is the
//! pure per-tick step; `CompletionWatcher` only adds the listing and the
//! clock around it.

use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cluster::{ResourceClient, ResourceKind};
use crate::error::{ApiError, Result};
use crate::models::STAGE_ID_LABEL;
use crate::staging::application::completion_time;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Running,
    Succeeded,
    Failed(String),
    TimedOut,
}

impl CompletionOutcome {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Classify the runs found for one stage id.
///
/// A false condition on any run wins over a completion time on another.
#[must_use]
pub fn observe(runs: &[DynamicObject]) -> CompletionOutcome {
    if let Some(message) = runs.iter().find_map(failed_condition) {
        return CompletionOutcome::Failed(message);
    }
    if runs.iter().any(|run| completion_time(run).is_some()) {
        return CompletionOutcome::Succeeded;
    }
    CompletionOutcome::Running
}

fn failed_condition(run: &DynamicObject) -> Option<String> {
    run.data
        .get("status")?
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("status").and_then(serde_json::Value::as_str) == Some("False"))
        .map(|c| {
            c.get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
}

/// Polls the staging namespace until a run resolves or the deadline passes
#[derive(Clone)]
pub struct CompletionWatcher {
    resources: Arc<dyn ResourceClient>,
    staging_namespace: String,
    deadline: Duration,
}

impl CompletionWatcher {
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        staging_namespace: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            resources,
            staging_namespace: staging_namespace.into(),
            deadline,
        }
    }

    /// Poll now, then every second, until the stage resolves
    pub async fn watch(&self, stage_id: &str) -> Result<CompletionOutcome> {
        let deadline = Instant::now() + self.deadline;
        let selector = format!("{STAGE_ID_LABEL}={stage_id}");

        loop {
            let runs = self
                .resources
                .list(ResourceKind::PipelineRun, &self.staging_namespace, &selector)
                .await
                .map_err(|e| ApiError::internal(e, "listing pipeline runs"))?;

            let outcome = observe(&runs);
            if outcome.is_terminal() {
                return Ok(outcome);
            }
            debug!(stage_id, runs = runs.len(), "Stage still running");

            let next = Instant::now() + POLL_INTERVAL;
            if next > deadline {
                sleep_until(deadline).await;
                return Ok(CompletionOutcome::TimedOut);
            }
            sleep_until(next).await;
        }
    }

    /// Succeed once the run completes; failure and timeout become errors
    #[instrument(skip(self), fields(namespace = %self.staging_namespace))]
    pub async fn await_completion(&self, stage_id: &str) -> Result<()> {
        match self.watch(stage_id).await? {
            CompletionOutcome::Succeeded => {
                info!(stage_id, "Stage completed");
                Ok(())
            }
            CompletionOutcome::Failed(message) => {
                warn!(stage_id, %message, "Stage failed");
                Err(ApiError::internal(
                    anyhow::anyhow!(message.clone()),
                    message,
                ))
            }
            CompletionOutcome::TimedOut | CompletionOutcome::Running => {
                warn!(stage_id, deadline = ?self.deadline, "Stage did not complete in time");
                Err(ApiError::Timeout(format!("stage {stage_id}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryResources, PipelineFlavor};
    use std::collections::BTreeMap;

    const NS: &str = "tekton-staging";

    fn staged_run(stage_id: &str, status: serde_json::Value) -> DynamicObject {
        let ar = ResourceKind::PipelineRun.api_resource(PipelineFlavor::V1);
        let mut object = DynamicObject::new(stage_id, &ar);
        object.metadata.labels = Some(BTreeMap::from([(
            STAGE_ID_LABEL.to_string(),
            stage_id.to_string(),
        )]));
        object.data = serde_json::json!({ "status": status });
        object
    }

    fn watcher(store: Arc<MemoryResources>, deadline: Duration) -> CompletionWatcher {
        CompletionWatcher::new(store, NS, deadline)
    }

    #[test]
    fn observe_classifies_runs() {
        assert_eq!(observe(&[]), CompletionOutcome::Running);

        let running = staged_run("s1", serde_json::json!({
            "conditions": [{"type": "Succeeded", "status": "Unknown"}]
        }));
        assert_eq!(observe(&[running.clone()]), CompletionOutcome::Running);

        let done = staged_run("s1", serde_json::json!({
            "completionTime": "2024-05-01T12:00:00Z",
            "conditions": [{"type": "Succeeded", "status": "True"}]
        }));
        assert_eq!(observe(&[running.clone(), done.clone()]), CompletionOutcome::Succeeded);

        let failed = staged_run("s1", serde_json::json!({
            "completionTime": "2024-05-01T12:00:00Z",
            "conditions": [{"type": "Succeeded", "status": "False", "message": "build step failed"}]
        }));
        assert_eq!(
            observe(&[done, failed]),
            CompletionOutcome::Failed("build step failed".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completes_on_a_later_tick() {
        let store = Arc::new(MemoryResources::default());
        store.insert(ResourceKind::PipelineRun, NS, staged_run("s1", serde_json::json!({})));

        let handle = {
            let watcher = watcher(store.clone(), Duration::from_secs(600));
            tokio::spawn(async move { watcher.await_completion("s1").await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.update(ResourceKind::PipelineRun, NS, "s1", |run| {
            run.data["status"]["completionTime"] = serde_json::json!("2024-05-01T12:00:00Z");
        });

        let started = Instant::now();
        handle.await.unwrap().unwrap();
        assert!(started.elapsed() <= POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_surfaces_before_the_deadline() {
        let store = Arc::new(MemoryResources::default());
        let deadline = Duration::from_secs(600);

        let handle = {
            let watcher = watcher(store.clone(), deadline);
            tokio::spawn(async move { watcher.await_completion("s1").await })
        };

        // Nothing listed on the first ticks
        tokio::time::sleep(Duration::from_millis(2500)).await;
        store.insert(
            ResourceKind::PipelineRun,
            NS,
            staged_run("s1", serde_json::json!({
                "conditions": [{"type": "Succeeded", "status": "False", "message": "build step failed"}]
            })),
        );

        let started = Instant::now();
        let err = handle.await.unwrap().unwrap_err();
        assert!(started.elapsed() < deadline);
        assert!(matches!(err, ApiError::Internal { .. }));
        assert_eq!(err.details(), "build step failed");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_deadline() {
        let store = Arc::new(MemoryResources::default());
        store.insert(ResourceKind::PipelineRun, NS, staged_run("s1", serde_json::json!({})));
        let deadline = Duration::from_secs(10);

        let started = Instant::now();
        let outcome = watcher(store.clone(), deadline).watch("s1").await.unwrap();
        assert_eq!(outcome, CompletionOutcome::TimedOut);
        assert_eq!(started.elapsed(), deadline);

        let err = watcher(store, deadline).await_completion("s1").await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_of_other_stages_are_ignored() {
        let store = Arc::new(MemoryResources::default());
        store.insert(
            ResourceKind::PipelineRun,
            NS,
            staged_run("other", serde_json::json!({"completionTime": "2024-05-01T12:00:00Z"})),
        );

        let outcome = watcher(store, Duration::from_secs(3)).watch("s1").await.unwrap();
        assert_eq!(outcome, CompletionOutcome::TimedOut);
    }
}
