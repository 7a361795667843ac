//! Strategy traits for the pluggable analysis collaborators.
//!
//! The pipeline core (crawl, map/reduce, schema extraction) is fixed; the
//! parts that encode ecosystem knowledge are behind traits so callers can
//! swap heuristics for something smarter:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Strategies                         │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐  │
//! │  │ ProjectType  │ │   Service    │ │  Relationship    │  │
//! │  │  Detector    │ │  Discovery   │ │   Discovery      │  │
//! │  └──────────────┘ └──────────────┘ └──────────────────┘  │
//! │  ┌──────────────┐                                        │
//! │  │   Secret     │                                        │
//! │  │  Extractor   │                                        │
//! │  └──────────────┘                                        │
//! └──────────────────────────┬───────────────────────────────┘
//!                            ▼
//!                 Orchestrator::run() stages
//! ```
//!
//! [`Strategies::default`] wires the built-in heuristic implementations.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::detect::HeuristicDetector;
use crate::models::{DetectionResult, DiscoveredService, FileList, SecretsReport, ServiceGraph};
use crate::secrets::EnvSecretExtractor;
use crate::services::{HeuristicRelationshipDiscovery, ManifestServiceDiscovery};

// ═══════════════════════════════════════════════════════════════════════
// Detection
// ═══════════════════════════════════════════════════════════════════════

/// Classifies a repository (backend, frontend, library, …).
///
/// Receives the crawled file list and the head of each important file
/// (manifests, READMEs, Dockerfiles) keyed by relative path. Confidence is
/// on a 0–10 scale.
#[async_trait]
pub trait ProjectTypeDetector: Send + Sync {
    async fn detect(
        &self,
        files: &FileList,
        important_files: &BTreeMap<String, String>,
    ) -> Result<DetectionResult>;
}

// ═══════════════════════════════════════════════════════════════════════
// Monorepo services
// ═══════════════════════════════════════════════════════════════════════

/// Finds deployable services inside a monorepo.
///
/// `contents` maps relative paths to bounded file contents (manifests,
/// entry points, compose files, env templates); `folders` lists every
/// directory that holds at least one crawled file.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover(
        &self,
        contents: &BTreeMap<String, String>,
        folders: &[String],
    ) -> Result<Vec<DiscoveredService>>;
}

/// Infers which services talk to which.
///
/// Every relationship carries the file it was inferred from and a
/// confidence in `[0, 1]`.
#[async_trait]
pub trait RelationshipDiscovery: Send + Sync {
    async fn discover(
        &self,
        services: &[DiscoveredService],
        contents: &BTreeMap<String, String>,
    ) -> Result<ServiceGraph>;
}

// ═══════════════════════════════════════════════════════════════════════
// Secrets
// ═══════════════════════════════════════════════════════════════════════

/// Lists the configuration secrets a project expects, without values.
#[async_trait]
pub trait SecretExtractor: Send + Sync {
    async fn extract(&self, project_path: &Path) -> Result<SecretsReport>;
}

/// The collaborator set handed to the orchestrator.
#[derive(Clone)]
pub struct Strategies {
    pub detector: Arc<dyn ProjectTypeDetector>,
    pub services: Arc<dyn ServiceDiscovery>,
    pub relationships: Arc<dyn RelationshipDiscovery>,
    pub secrets: Arc<dyn SecretExtractor>,
}

impl Default for Strategies {
    fn default() -> Self {
        Self {
            detector: Arc::new(HeuristicDetector),
            services: Arc::new(ManifestServiceDiscovery),
            relationships: Arc::new(HeuristicRelationshipDiscovery),
            secrets: Arc::new(EnvSecretExtractor::default()),
        }
    }
}
