//! Core data models used throughout the analysis pipeline.
//!
//! These types represent the files, summaries and aggregated results that
//! flow from the crawler through the map and reduce stages. All summary
//! types are serde-serializable so they can be cached and streamed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ddl::SchemaReport;

/// A file accepted by the crawler. Read-only after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    /// Lowercase extension without the dot; empty for extension-less files.
    pub extension: String,
    pub is_dir: bool,
}

impl FileRecord {
    /// Lowercase final path component.
    pub fn file_name(&self) -> String {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Parent directory of the relative path, `None` for root-level files.
    pub fn parent_dir(&self) -> Option<&str> {
        self.relative_path.rsplit_once('/').map(|(dir, _)| dir)
    }
}

/// Counters collected while crawling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub files_seen: usize,
    pub files_accepted: usize,
    pub skipped_extension: usize,
    pub skipped_size: usize,
    pub skipped_secret: usize,
    pub skipped_glob: usize,
    pub total_bytes: u64,
    pub by_extension: BTreeMap<String, usize>,
}

/// Output of the crawler: the accepted files in relative-path order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileList {
    pub root: PathBuf,
    pub files: Vec<FileRecord>,
    pub stats: CrawlStats,
}

impl FileList {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|f| f.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Distinct parent directories, `root` for top-level files.
    pub fn folders(&self) -> Vec<String> {
        let mut dirs: Vec<String> = self
            .files
            .iter()
            .map(|f| f.parent_dir().unwrap_or(ROOT_FOLDER).to_string())
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }
}

/// Sentinel folder name for files at the repository root.
pub const ROOT_FOLDER: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Map-stage output for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub language: String,
    pub purpose: String,
    pub key_types: Vec<String>,
    pub functions: Vec<String>,
    pub imports: Vec<String>,
    pub side_effects: Vec<String>,
    pub risks: Vec<String>,
    pub complexity: Complexity,
}

/// Folder-level reduce output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub path: String,
    pub purpose: String,
    pub languages: BTreeMap<String, usize>,
    pub key_modules: Vec<String>,
    pub dependencies: Vec<String>,
    pub architecture: String,
    /// The file summaries this folder aggregated, keyed by relative path.
    pub files: BTreeMap<String, FileSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Monolith,
    Microservices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoLayout {
    SingleRepo,
    Monorepo,
}

/// Repository-level deep dive attached to the project summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedAnalysis {
    pub summary: String,
    pub architecture: Architecture,
    pub layout: RepoLayout,
    pub main_stacks: Vec<String>,
    pub monorepo_services: Vec<String>,
    pub evidence_paths: Vec<String>,
    pub confidence: f64,
}

/// Project-level reduce output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub purpose: String,
    pub architecture: String,
    pub data_models: Vec<String>,
    pub external_services: Vec<String>,
    pub languages: BTreeMap<String, usize>,
    pub folders: BTreeMap<String, FolderSummary>,
    #[serde(default)]
    pub detailed: Option<DetailedAnalysis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Backend,
    Frontend,
    Fullstack,
    Mobile,
    Library,
    Cli,
    Infrastructure,
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Backend => "backend",
            ProjectType::Frontend => "frontend",
            ProjectType::Fullstack => "fullstack",
            ProjectType::Mobile => "mobile",
            ProjectType::Library => "library",
            ProjectType::Cli => "cli",
            ProjectType::Infrastructure => "infrastructure",
            ProjectType::Unknown => "unknown",
        }
    }

    /// Project types whose repositories are expected to carry SQL migrations.
    pub fn has_database(&self) -> bool {
        matches!(self, ProjectType::Backend | ProjectType::Fullstack)
    }
}

/// Result of the project-type detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub primary: ProjectType,
    pub secondary: Vec<ProjectType>,
    /// Confidence on a 0–10 scale.
    pub confidence: f64,
    pub evidence_by_type: BTreeMap<String, Vec<String>>,
    pub scores_by_type: BTreeMap<String, f64>,
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self {
            primary: ProjectType::Unknown,
            secondary: Vec::new(),
            confidence: 0.0,
            evidence_by_type: BTreeMap::new(),
            scores_by_type: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    Http,
    Grpc,
    Graphql,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub name: String,
    pub path: String,
    pub entry_point: Option<String>,
    pub api_type: ApiType,
    pub port: Option<u16>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Evidence {
    Config,
    Import,
    Network,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRelationship {
    pub from: String,
    pub to: String,
    pub evidence: Evidence,
    pub file_path: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceGraph {
    pub relationships: Vec<ServiceRelationship>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    DatabaseUrl,
    Secret,
    Credential,
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: SecretType,
    pub example: String,
    pub required: bool,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretsLayout {
    Monorepo,
    SingleService,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSecrets {
    pub service: String,
    pub path: String,
    pub secrets: Vec<SecretSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsReport {
    pub project_type: SecretsLayout,
    pub services: Vec<ServiceSecrets>,
    pub global_secrets: Vec<SecretSpec>,
}

/// Everything a run produced. Missing sub-results stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub project_path: String,
    pub source_url: Option<String>,
    pub stats: Option<CrawlStats>,
    pub detection: Option<DetectionResult>,
    pub file_summaries: BTreeMap<String, FileSummary>,
    pub project: Option<ProjectSummary>,
    pub services: Option<Vec<DiscoveredService>>,
    pub service_graph: Option<ServiceGraph>,
    pub schema: Option<SchemaReport>,
    pub secrets: Option<SecretsReport>,
    pub warnings: usize,
    pub llm_calls: u64,
}

impl AnalysisResult {
    pub fn new(project_path: String, source_url: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            project_path,
            source_url,
            stats: None,
            detection: None,
            file_summaries: BTreeMap::new(),
            project: None,
            services: None,
            service_graph: None,
            schema: None,
            secrets: None,
            warnings: 0,
            llm_calls: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rel: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/repo").join(rel),
            relative_path: rel.to_string(),
            size: 1,
            extension: "rs".into(),
            is_dir: false,
        }
    }

    #[test]
    fn folders_map_root_files_to_sentinel() {
        let list = FileList {
            root: PathBuf::from("/repo"),
            files: vec![record("a/b/c.rs"), record("a/d.rs"), record("main.rs")],
            stats: CrawlStats::default(),
        };
        assert_eq!(list.folders(), vec!["a", "a/b", "root"]);
        assert!(list.get("a/d.rs").is_some());
        assert!(list.get("zzz.rs").is_none());
    }

    #[test]
    fn enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&RepoLayout::SingleRepo).unwrap(),
            "\"single-repo\""
        );
        assert_eq!(
            serde_json::to_string(&SecretType::DatabaseUrl).unwrap(),
            "\"database_url\""
        );
        let c: Complexity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(c, Complexity::Medium);
        assert!(serde_json::from_str::<Complexity>("\"extreme\"").is_err());
    }
}
