//! Marker-based project type detection.
//!
//! Each project type collects points from marker files (file names,
//! extensions, directory names) and from dependency names found in the
//! important-file contents. The highest score wins; a repository that is
//! strong on both backend and frontend is reported as fullstack.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::models::{DetectionResult, FileList, ProjectType};
use crate::traits::ProjectTypeDetector;

/// Minimum score for a type to be listed as secondary, and for backend and
/// frontend to combine into fullstack.
const STRONG: f64 = 3.0;

/// Dependency names looked up in manifests, with the type they vote for.
const DEPENDENCY_MARKERS: &[(&str, ProjectType, f64)] = &[
    // JavaScript / TypeScript
    ("\"express\"", ProjectType::Backend, 3.0),
    ("\"fastify\"", ProjectType::Backend, 3.0),
    ("\"koa\"", ProjectType::Backend, 3.0),
    ("\"@nestjs/core\"", ProjectType::Backend, 3.0),
    ("\"@hapi/hapi\"", ProjectType::Backend, 3.0),
    ("\"prisma\"", ProjectType::Backend, 1.0),
    ("\"react\"", ProjectType::Frontend, 3.0),
    ("\"vue\"", ProjectType::Frontend, 3.0),
    ("\"svelte\"", ProjectType::Frontend, 3.0),
    ("\"@angular/core\"", ProjectType::Frontend, 3.0),
    ("\"next\"", ProjectType::Fullstack, 2.0),
    ("\"nuxt\"", ProjectType::Fullstack, 2.0),
    ("\"react-native\"", ProjectType::Mobile, 4.0),
    ("\"expo\"", ProjectType::Mobile, 3.0),
    ("\"commander\"", ProjectType::Cli, 2.0),
    ("\"yargs\"", ProjectType::Cli, 2.0),
    // Python
    ("django", ProjectType::Backend, 3.0),
    ("flask", ProjectType::Backend, 3.0),
    ("fastapi", ProjectType::Backend, 3.0),
    ("sqlalchemy", ProjectType::Backend, 1.0),
    ("click", ProjectType::Cli, 1.0),
    ("typer", ProjectType::Cli, 2.0),
    // Go
    ("github.com/gin-gonic/gin", ProjectType::Backend, 3.0),
    ("github.com/labstack/echo", ProjectType::Backend, 3.0),
    ("github.com/gofiber/fiber", ProjectType::Backend, 3.0),
    ("google.golang.org/grpc", ProjectType::Backend, 2.0),
    ("github.com/spf13/cobra", ProjectType::Cli, 3.0),
    // Rust
    ("axum", ProjectType::Backend, 3.0),
    ("actix-web", ProjectType::Backend, 3.0),
    ("rocket", ProjectType::Backend, 3.0),
    ("sqlx", ProjectType::Backend, 1.0),
    ("clap", ProjectType::Cli, 3.0),
    ("yew", ProjectType::Frontend, 3.0),
    ("leptos", ProjectType::Fullstack, 2.0),
    // JVM
    ("spring-boot", ProjectType::Backend, 3.0),
    ("io.ktor", ProjectType::Backend, 3.0),
    ("com.android.application", ProjectType::Mobile, 4.0),
    // Dart
    ("flutter:", ProjectType::Mobile, 4.0),
];

/// Markers matched against lowercase file names.
const FILE_MARKERS: &[(&str, ProjectType, f64)] = &[
    ("go.mod", ProjectType::Backend, 1.0),
    ("manage.py", ProjectType::Backend, 3.0),
    ("dockerfile", ProjectType::Backend, 1.0),
    ("index.html", ProjectType::Frontend, 1.0),
    ("vite.config.ts", ProjectType::Frontend, 2.0),
    ("vite.config.js", ProjectType::Frontend, 2.0),
    ("webpack.config.js", ProjectType::Frontend, 2.0),
    ("androidmanifest.xml", ProjectType::Mobile, 4.0),
    ("pubspec.yaml", ProjectType::Mobile, 2.0),
    ("podfile", ProjectType::Mobile, 3.0),
    ("lib.rs", ProjectType::Library, 2.0),
    ("setup.py", ProjectType::Library, 1.0),
    ("chart.yaml", ProjectType::Infrastructure, 3.0),
    ("kustomization.yaml", ProjectType::Infrastructure, 3.0),
];

/// Markers matched against lowercase extensions; counted once per type.
const EXTENSION_MARKERS: &[(&str, ProjectType, f64)] = &[
    ("tsx", ProjectType::Frontend, 2.0),
    ("jsx", ProjectType::Frontend, 2.0),
    ("vue", ProjectType::Frontend, 3.0),
    ("svelte", ProjectType::Frontend, 3.0),
    ("swift", ProjectType::Mobile, 2.0),
    ("kt", ProjectType::Mobile, 1.0),
    ("dart", ProjectType::Mobile, 2.0),
    ("tf", ProjectType::Infrastructure, 4.0),
    ("proto", ProjectType::Backend, 1.0),
];

/// Markers matched against directory components of a relative path.
const DIRECTORY_MARKERS: &[(&str, ProjectType, f64)] = &[
    ("migrations", ProjectType::Backend, 2.0),
    ("handlers", ProjectType::Backend, 1.0),
    ("controllers", ProjectType::Backend, 1.0),
    ("components", ProjectType::Frontend, 2.0),
    ("pages", ProjectType::Frontend, 1.0),
    ("ios", ProjectType::Mobile, 1.0),
    ("android", ProjectType::Mobile, 1.0),
    ("cmd", ProjectType::Cli, 1.0),
    ("terraform", ProjectType::Infrastructure, 2.0),
    ("helm", ProjectType::Infrastructure, 2.0),
    ("k8s", ProjectType::Infrastructure, 2.0),
];

#[derive(Default)]
struct Tally {
    scores: BTreeMap<ProjectType, f64>,
    evidence: BTreeMap<ProjectType, Vec<String>>,
}

impl Tally {
    fn vote(&mut self, kind: ProjectType, weight: f64, evidence: String) {
        let list = self.evidence.entry(kind).or_default();
        if list.contains(&evidence) {
            return;
        }
        list.push(evidence);
        *self.scores.entry(kind).or_default() += weight;
    }

    fn score(&self, kind: ProjectType) -> f64 {
        self.scores.get(&kind).copied().unwrap_or(0.0)
    }
}

/// The built-in detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDetector;

impl HeuristicDetector {
    fn tally(files: &FileList, important_files: &BTreeMap<String, String>) -> Tally {
        let mut tally = Tally::default();

        for record in &files.files {
            let name = record.file_name();
            for (marker, kind, weight) in FILE_MARKERS {
                if name == *marker {
                    tally.vote(*kind, *weight, record.relative_path.clone());
                }
            }
            for (ext, kind, weight) in EXTENSION_MARKERS {
                if record.extension == *ext {
                    tally.vote(*kind, *weight, format!("*.{}", ext));
                }
            }
            if let Some(dir) = record.parent_dir() {
                for component in dir.split('/') {
                    let component = component.to_lowercase();
                    for (marker, kind, weight) in DIRECTORY_MARKERS {
                        if component == *marker {
                            tally.vote(*kind, *weight, format!("{}/", marker));
                        }
                    }
                }
            }
        }

        for (path, content) in important_files {
            let content = content.to_lowercase();
            for (marker, kind, weight) in DEPENDENCY_MARKERS {
                if content.contains(marker) {
                    tally.vote(
                        *kind,
                        *weight,
                        format!("{} in {}", marker.trim_matches('"'), path),
                    );
                }
            }
        }
        tally
    }
}

#[async_trait]
impl ProjectTypeDetector for HeuristicDetector {
    async fn detect(
        &self,
        files: &FileList,
        important_files: &BTreeMap<String, String>,
    ) -> Result<DetectionResult> {
        let tally = Self::tally(files, important_files);
        let total: f64 = tally.scores.values().sum();
        if total == 0.0 {
            return Ok(DetectionResult::default());
        }

        // Highest score; ties go to the earlier variant.
        let mut ranked: Vec<(ProjectType, f64)> =
            tally.scores.iter().map(|(k, v)| (*k, *v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let (mut primary, mut top) = ranked[0];

        let backend = tally.score(ProjectType::Backend);
        let frontend = tally.score(ProjectType::Frontend);
        if backend >= STRONG && frontend >= STRONG {
            let combined = backend + frontend + tally.score(ProjectType::Fullstack);
            if combined >= top {
                primary = ProjectType::Fullstack;
                top = combined;
            }
        }

        let secondary: Vec<ProjectType> = ranked
            .iter()
            .filter(|(kind, score)| *kind != primary && *score >= STRONG)
            .map(|(kind, _)| *kind)
            .collect();

        // Share of the evidence, damped when the evidence is thin.
        let share = (top / total).min(1.0);
        let saturation = (top / 8.0).min(1.0);
        let confidence = (10.0 * share * saturation * 10.0).round() / 10.0;

        debug!(
            primary = primary.as_str(),
            confidence,
            "project type detected"
        );

        Ok(DetectionResult {
            primary,
            secondary,
            confidence: confidence.clamp(0.0, 10.0),
            evidence_by_type: tally
                .evidence
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v))
                .collect(),
            scores_by_type: tally
                .scores
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlStats, FileRecord};
    use std::path::PathBuf;

    fn list(paths: &[&str]) -> FileList {
        let mut files: Vec<FileRecord> = paths
            .iter()
            .map(|p| FileRecord {
                path: PathBuf::from("/repo").join(p),
                relative_path: p.to_string(),
                size: 10,
                extension: p
                    .rsplit_once('.')
                    .map(|(_, e)| e.to_lowercase())
                    .unwrap_or_default(),
                is_dir: false,
            })
            .collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        FileList {
            root: PathBuf::from("/repo"),
            files,
            stats: CrawlStats::default(),
        }
    }

    #[tokio::test]
    async fn go_service_with_migrations_is_backend() {
        let files = list(&["go.mod", "cmd/api/main.go", "migrations/001_init.sql"]);
        let important = BTreeMap::from([(
            "go.mod".to_string(),
            "module x\nrequire github.com/gin-gonic/gin v1.9.0".to_string(),
        )]);
        let result = HeuristicDetector.detect(&files, &important).await.unwrap();
        assert_eq!(result.primary, ProjectType::Backend);
        assert!(result.primary.has_database());
        assert!(result.confidence > 0.0 && result.confidence <= 10.0);
        assert!(result.evidence_by_type["backend"]
            .iter()
            .any(|e| e.contains("gin")));
    }

    #[tokio::test]
    async fn react_and_express_is_fullstack() {
        let files = list(&["client/src/components/App.tsx", "server/index.js"]);
        let important = BTreeMap::from([
            (
                "client/package.json".to_string(),
                r#"{"dependencies": {"react": "18"}}"#.to_string(),
            ),
            (
                "server/package.json".to_string(),
                r#"{"dependencies": {"express": "4"}}"#.to_string(),
            ),
        ]);
        let result = HeuristicDetector.detect(&files, &important).await.unwrap();
        assert_eq!(result.primary, ProjectType::Fullstack);
        assert!(result.secondary.contains(&ProjectType::Frontend));
    }

    #[tokio::test]
    async fn nothing_recognisable_is_unknown() {
        let files = list(&["notes.txt"]);
        let result = HeuristicDetector
            .detect(&files, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(result.primary, ProjectType::Unknown);
        assert_eq!(result.confidence, 0.0);
    }
}
