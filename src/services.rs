//! Monorepo service discovery and inter-service relationship inference.
//!
//! Both strategies work on a bounded content map (relative path → file
//! head) built by the orchestrator from manifests, entry points, compose
//! files and env templates; see [`is_service_file`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::crawler::ENV_TEMPLATES;
use crate::models::{ApiType, DiscoveredService, Evidence, ServiceGraph, ServiceRelationship};
use crate::traits::{RelationshipDiscovery, ServiceDiscovery};

/// Top-level directories whose children are treated as services.
const SERVICE_ROOTS: &[&str] = &["services", "apps", "packages", "cmd", "microservices"];

const MANIFESTS: &[&str] = &[
    "package.json",
    "go.mod",
    "cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
];

/// Entry files in preference order, relative to the service directory.
const ENTRY_FILES: &[&str] = &[
    "main.go",
    "src/main.rs",
    "src/index.ts",
    "src/index.js",
    "src/server.ts",
    "src/main.ts",
    "index.ts",
    "index.js",
    "server.js",
    "server.ts",
    "app.py",
    "main.py",
    "manage.py",
    "src/main/java/Application.java",
];

static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?m)^\s*EXPOSE\s+(\d{2,5})",
        r#"(?i)\bPORT\s*[=:]\s*["']?(\d{2,5})\b"#,
        r"\.listen\(\s*(\d{2,5})",
        r#"["']:(\d{4,5})["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid port regex"))
    .collect()
});

static COMPOSE_SERVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^  ([A-Za-z0-9_.-]+):\s*$").expect("valid compose regex"));

/// Whether a file belongs in the service-discovery content map.
pub fn is_service_file(relative_path: &str) -> bool {
    let lower = relative_path.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or_default();
    MANIFESTS.contains(&name)
        || name == "dockerfile"
        || is_compose_file(name)
        || is_env_template(name)
        || name.ends_with(".proto")
        || ENTRY_FILES.iter().any(|e| lower.ends_with(e))
}

fn is_compose_file(name: &str) -> bool {
    (name.starts_with("docker-compose") || name.starts_with("compose"))
        && (name.ends_with(".yml") || name.ends_with(".yaml"))
}

fn is_env_template(name: &str) -> bool {
    ENV_TEMPLATES.contains(&name) || name == "env.example"
}

/// The `<root>/<child>` service directory a path lives in, when its first
/// component is a conventional service root.
pub fn service_root(relative_path: &str) -> Option<String> {
    let mut parts = relative_path.split('/');
    let (root, child) = (parts.next()?, parts.next()?);
    parts.next()?;
    SERVICE_ROOTS
        .contains(&root.to_lowercase().as_str())
        .then(|| format!("{}/{}", root, child))
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_lowercase()
}

fn dir_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
}

fn in_dir<'a>(
    contents: &'a BTreeMap<String, String>,
    dir: &'a str,
) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
    let prefix = format!("{}/", dir);
    contents
        .iter()
        .filter(move |(path, _)| path.starts_with(&prefix))
}

// ═══════════════════════════════════════════════════════════════════════
// Discovery
// ═══════════════════════════════════════════════════════════════════════

/// Finds services by conventional roots and manifest + Dockerfile pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestServiceDiscovery;

impl ManifestServiceDiscovery {
    fn candidate_dirs(contents: &BTreeMap<String, String>, folders: &[String]) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for folder in folders {
            // A folder is a directory; match it through a child path.
            if let Some(dir) = service_root(&format!("{}/_", folder)) {
                dirs.insert(dir);
            }
        }

        let mut manifests = BTreeSet::new();
        let mut dockerfiles = BTreeSet::new();
        for path in contents.keys() {
            let name = file_name(path);
            if MANIFESTS.contains(&name.as_str()) {
                manifests.insert(dir_of(path));
            } else if name == "dockerfile" {
                dockerfiles.insert(dir_of(path));
            }
        }
        for dir in manifests.intersection(&dockerfiles) {
            if !dir.is_empty() {
                dirs.insert(dir.to_string());
            }
        }

        // Nested candidates collapse into their outermost service.
        let all: Vec<String> = dirs.iter().cloned().collect();
        dirs.retain(|d| !all.iter().any(|o| o != d && d.starts_with(&format!("{}/", o))));
        dirs
    }

    fn describe(dir: &str, contents: &BTreeMap<String, String>) -> DiscoveredService {
        let name = dir.rsplit('/').next().unwrap_or(dir).to_string();
        let files: Vec<(&String, &String)> = in_dir(contents, dir).collect();

        let entry_point = ENTRY_FILES
            .iter()
            .map(|e| format!("{}/{}", dir, e))
            .find(|p| contents.contains_key(p))
            .or_else(|| {
                files
                    .iter()
                    .map(|(p, _)| p.as_str())
                    .find(|p| p.ends_with("/main.go"))
                    .map(str::to_string)
            });

        let mut haystack = String::new();
        for (path, content) in &files {
            haystack.push_str(&path.to_lowercase());
            haystack.push('\n');
            haystack.push_str(&content.to_lowercase());
            haystack.push('\n');
        }
        let api_type = if haystack.contains(".proto") || haystack.contains("grpc") {
            ApiType::Grpc
        } else if haystack.contains("graphql") || haystack.contains("apollo") {
            ApiType::Graphql
        } else {
            ApiType::Http
        };

        // Dockerfile first: EXPOSE is the most explicit declaration.
        let mut ordered = files.clone();
        ordered.sort_by_key(|(p, _)| file_name(p) != "dockerfile");
        let port = ordered.iter().find_map(|(_, content)| find_port(content));

        let description = files
            .iter()
            .find(|(p, _)| file_name(p) == "package.json")
            .and_then(|(_, c)| serde_json::from_str::<serde_json::Value>(c).ok())
            .and_then(|v| v.get("description")?.as_str().map(str::to_string))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| {
                let api = match api_type {
                    ApiType::Http => "HTTP",
                    ApiType::Grpc => "gRPC",
                    ApiType::Graphql => "GraphQL",
                };
                format!("{} service in {}", api, dir)
            });

        DiscoveredService {
            name,
            path: dir.to_string(),
            entry_point,
            api_type,
            port,
            description,
        }
    }
}

fn find_port(content: &str) -> Option<u16> {
    PORT_PATTERNS.iter().find_map(|re| {
        re.captures(content)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|p| *p > 0)
    })
}

#[async_trait]
impl ServiceDiscovery for ManifestServiceDiscovery {
    async fn discover(
        &self,
        contents: &BTreeMap<String, String>,
        folders: &[String],
    ) -> Result<Vec<DiscoveredService>> {
        let services: Vec<DiscoveredService> = Self::candidate_dirs(contents, folders)
            .iter()
            .map(|dir| Self::describe(dir, contents))
            .collect();
        debug!(count = services.len(), "services discovered");
        Ok(services)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Relationships
// ═══════════════════════════════════════════════════════════════════════

/// Infers edges from URLs, dependency names and compose/env configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicRelationshipDiscovery;

const NETWORK_CONFIDENCE: f64 = 0.8;
const IMPORT_CONFIDENCE: f64 = 0.7;
const CONFIG_CONFIDENCE: f64 = 0.9;
const ENV_CONFIDENCE: f64 = 0.6;

impl HeuristicRelationshipDiscovery {
    fn network_hit(content: &str, target: &DiscoveredService) -> bool {
        let name = target.name.to_lowercase();
        content.contains(&format!("://{}", name))
            || content.contains(&format!("://{}:", name))
            || target
                .port
                .is_some_and(|p| content.contains(&format!("{}:{}", name, p)))
    }

    fn import_hit(path: &str, content: &str, target: &DiscoveredService) -> bool {
        let name = target.name.to_lowercase();
        let file = file_name(path);
        if MANIFESTS.contains(&file.as_str()) {
            return content.contains(&format!("\"{}\"", name))
                || content.contains(&format!("/{}\"", name))
                || content.contains(&format!("/{}\":", name))
                || content.contains(&format!("/{} ", name));
        }
        content.contains(&format!("from '{}", name))
            || content.contains(&format!("from \"{}", name))
            || content.contains(&format!("require('{}", name))
            || content.contains(&format!("/{}\"", name))
    }

    fn env_hit(content: &str, target: &DiscoveredService) -> bool {
        let key = target.name.to_uppercase().replace('-', "_");
        content
            .lines()
            .any(|l| l.trim_start().starts_with(&key) && l.contains('='))
    }

    /// `depends_on` edges from a compose file: (dependent, dependency).
    fn compose_edges(content: &str) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        let mut in_services = false;
        let mut current: Option<String> = None;
        let mut in_depends = false;
        for line in content.lines() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            if indent == 0 {
                in_services = line.trim_end() == "services:";
                current = None;
                in_depends = false;
                continue;
            }
            if !in_services {
                continue;
            }
            if let Some(caps) = COMPOSE_SERVICE.captures(line) {
                current = Some(caps[1].to_lowercase());
                in_depends = false;
                continue;
            }
            let Some(service) = &current else { continue };
            let trimmed = line.trim();
            if indent == 4 {
                in_depends = trimmed.starts_with("depends_on:");
                // Inline list form: depends_on: [db, cache]
                if let Some(rest) = trimmed.strip_prefix("depends_on:") {
                    let rest = rest.trim().trim_start_matches('[').trim_end_matches(']');
                    for dep in rest.split(',').map(|d| d.trim().trim_matches('"')) {
                        if !dep.is_empty() {
                            edges.push((service.clone(), dep.to_lowercase()));
                        }
                    }
                }
            } else if in_depends && indent >= 6 {
                let dep = trimmed.trim_start_matches("- ").trim_end_matches(':');
                if !dep.contains(':') && !dep.is_empty() && indent == 6 {
                    edges.push((service.clone(), dep.trim_matches('"').to_lowercase()));
                }
            }
        }
        edges
    }
}

#[async_trait]
impl RelationshipDiscovery for HeuristicRelationshipDiscovery {
    async fn discover(
        &self,
        services: &[DiscoveredService],
        contents: &BTreeMap<String, String>,
    ) -> Result<ServiceGraph> {
        let by_name: BTreeMap<String, &DiscoveredService> = services
            .iter()
            .map(|s| (s.name.to_lowercase(), s))
            .collect();
        let mut best: BTreeMap<(String, String, Evidence), ServiceRelationship> = BTreeMap::new();
        let mut record = |from: &str, to: &str, evidence: Evidence, file: &str, confidence: f64| {
            if from == to {
                return;
            }
            let key = (from.to_string(), to.to_string(), evidence);
            let keep = best.get(&key).map_or(true, |r| r.confidence < confidence);
            if keep {
                best.insert(
                    key,
                    ServiceRelationship {
                        from: from.to_string(),
                        to: to.to_string(),
                        evidence,
                        file_path: file.to_string(),
                        confidence,
                    },
                );
            }
        };

        for source in services {
            for (path, content) in in_dir(contents, &source.path) {
                let lower = content.to_lowercase();
                let name = file_name(path);
                for target in services {
                    if target.name == source.name {
                        continue;
                    }
                    if Self::network_hit(&lower, target) {
                        record(&source.name, &target.name, Evidence::Network, path, NETWORK_CONFIDENCE);
                    }
                    if Self::import_hit(path, &lower, target) {
                        record(&source.name, &target.name, Evidence::Import, path, IMPORT_CONFIDENCE);
                    }
                    if is_env_template(&name) && Self::env_hit(content, target) {
                        record(&source.name, &target.name, Evidence::Config, path, ENV_CONFIDENCE);
                    }
                }
            }
        }

        for (path, content) in contents {
            if !is_compose_file(&file_name(path)) {
                continue;
            }
            for (from, to) in Self::compose_edges(content) {
                if let (Some(a), Some(b)) = (by_name.get(&from), by_name.get(&to)) {
                    record(&a.name, &b.name, Evidence::Config, path, CONFIG_CONFIDENCE);
                }
            }
        }

        let graph = ServiceGraph {
            relationships: best.into_values().collect(),
        };
        debug!(edges = graph.relationships.len(), "service relationships inferred");
        Ok(graph)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════

/// `<dir>/<project path with separators replaced by '_'>.json`
pub fn graph_path(dir: &Path, project_path: &str) -> PathBuf {
    let stem: String = project_path
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    dir.join(format!("{}.json", stem))
}

/// Write the graph for a project, replacing any previous one.
pub async fn save_graph(dir: &Path, project_path: &str, graph: &ServiceGraph) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create relationships dir: {}", dir.display()))?;
    let path = graph_path(dir, project_path);
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(graph)?)
        .await
        .with_context(|| format!("Failed to write service graph: {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("Failed to move service graph into place: {}", path.display()))?;
    Ok(path)
}

/// Load a previously saved graph, `None` when absent.
pub async fn load_graph(dir: &Path, project_path: &str) -> Result<Option<ServiceGraph>> {
    let path = graph_path(dir, project_path);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).with_context(|| {
            format!("Failed to parse service graph: {}", path.display())
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read service graph: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn contents(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn fixture() -> (BTreeMap<String, String>, Vec<String>) {
        let map = contents(&[
            (
                "services/api/package.json",
                r#"{"name": "api", "description": "Public REST API", "dependencies": {"@acme/billing": "1.0"}}"#,
            ),
            (
                "services/api/src/index.ts",
                "const billing = 'http://billing:9000';\napp.listen(8080);",
            ),
            ("services/billing/go.mod", "module github.com/acme/billing"),
            ("services/billing/main.go", "import \"google.golang.org/grpc\""),
            ("services/billing/Dockerfile", "FROM golang\nEXPOSE 9000\n"),
            (
                "docker-compose.yml",
                "services:\n  api:\n    build: services/api\n    depends_on:\n      - billing\n  billing:\n    build: services/billing\n",
            ),
        ]);
        let folders = vec![
            "services/api".to_string(),
            "services/api/src".to_string(),
            "services/billing".to_string(),
        ];
        (map, folders)
    }

    #[tokio::test]
    async fn discovers_services_under_conventional_roots() {
        let (map, folders) = fixture();
        let services = ManifestServiceDiscovery.discover(&map, &folders).await.unwrap();
        assert_eq!(services.len(), 2);

        let api = &services[0];
        assert_eq!(api.name, "api");
        assert_eq!(api.entry_point.as_deref(), Some("services/api/src/index.ts"));
        assert_eq!(api.api_type, ApiType::Http);
        assert_eq!(api.description, "Public REST API");

        let billing = &services[1];
        assert_eq!(billing.api_type, ApiType::Grpc);
        assert_eq!(billing.port, Some(9000));
        assert_eq!(billing.entry_point.as_deref(), Some("services/billing/main.go"));
    }

    #[tokio::test]
    async fn infers_network_import_and_config_edges() {
        let (map, folders) = fixture();
        let services = ManifestServiceDiscovery.discover(&map, &folders).await.unwrap();
        let graph = HeuristicRelationshipDiscovery
            .discover(&services, &map)
            .await
            .unwrap();

        let evidence: Vec<Evidence> = graph
            .relationships
            .iter()
            .filter(|r| r.from == "api" && r.to == "billing")
            .map(|r| r.evidence)
            .collect();
        assert!(evidence.contains(&Evidence::Network));
        assert!(evidence.contains(&Evidence::Import));
        assert!(evidence.contains(&Evidence::Config));
        assert!(graph.relationships.iter().all(|r| r.from != r.to));
        assert!(graph
            .relationships
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn compose_inline_depends_on() {
        let edges = HeuristicRelationshipDiscovery::compose_edges(
            "version: '3'\nservices:\n  web:\n    depends_on: [db, \"cache\"]\n",
        );
        assert_eq!(
            edges,
            vec![
                ("web".to_string(), "db".to_string()),
                ("web".to_string(), "cache".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn graph_persists_under_flattened_path() {
        let tmp = TempDir::new().unwrap();
        let graph = ServiceGraph {
            relationships: vec![ServiceRelationship {
                from: "a".into(),
                to: "b".into(),
                evidence: Evidence::Network,
                file_path: "services/a/x.ts".into(),
                confidence: 0.8,
            }],
        };
        let path = save_graph(tmp.path(), "/work/acme/shop", &graph).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "_work_acme_shop.json");
        let loaded = load_graph(tmp.path(), "/work/acme/shop").await.unwrap();
        assert_eq!(loaded, Some(graph));
        assert!(load_graph(tmp.path(), "/elsewhere").await.unwrap().is_none());
    }
}
