/*
 * 5D Labs Kiln Platform - Application Staging Core
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Staging core library
//!
//! This crate turns an uploaded source blob into a Tekton `PipelineRun` that
//! builds the application image, and waits for that run to finish. It holds
//! the cluster capability interface, configuration, error classification and
//! the HTTP surface for the staging endpoints.

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod models;
pub mod staging;

// Re-export commonly used types
pub use cluster::{ClusterError, KubeResources, MemoryResources, PipelineFlavor, ResourceClient, ResourceKind};
pub use config::StagingConfig;
pub use error::{ApiError, Result};
pub use models::{AppRef, StageRef, StageRequest, StageResponse};
pub use staging::completion::{CompletionOutcome, CompletionWatcher};
pub use staging::StagingCoordinator;
