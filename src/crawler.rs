//! Repository crawler.
//!
//! Walks the repository root with gitignore support (`ignore` crate),
//! keeps files whose extension or name is supported, drops oversized files
//! and anything that looks like a secret file, and returns a [`FileList`]
//! sorted by relative path. Reads go through [`Crawler::read_file`], which
//! redacts secrets before content reaches a prompt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::config::CrawlerConfig;
use crate::context::RunContext;
use crate::models::{CrawlStats, FileList, FileRecord};
use crate::redact::redact;

/// Bytes read past a head limit so that secrets and multi-byte chars
/// straddling the cut are still redacted and decoded before truncation.
const HEAD_MARGIN: usize = 512;

/// Directory names that are never descended into.
pub(crate) const PRUNED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
];

/// File-name patterns treated as secret material.
const SECRET_FILE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.keystore",
    "*.jks",
    "id_rsa*",
    "id_dsa*",
    "id_ecdsa*",
    "id_ed25519*",
    "credentials.json",
    "secrets.*",
    ".npmrc",
    ".pypirc",
    ".netrc",
];

/// Env templates that look like secret files but only hold placeholders.
pub(crate) const ENV_TEMPLATES: &[&str] = &[".env.example", ".env.sample", ".env.template", ".env.dist"];

/// Build files identified by name alone.
const IMPORTANT_FILE_NAMES: &[&str] = &[
    "package.json",
    "go.mod",
    "go.work",
    "cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "dockerfile",
    "pnpm-workspace.yaml",
    "lerna.json",
    "nx.json",
    "turbo.json",
    "rush.json",
];

pub struct Crawler {
    root: PathBuf,
    config: CrawlerConfig,
    secret_files: GlobSet,
    excludes: GlobSet,
}

impl Crawler {
    pub fn new(root: impl Into<PathBuf>, config: CrawlerConfig) -> Result<Self> {
        let patterns: Vec<String> = SECRET_FILE_PATTERNS.iter().map(|s| s.to_string()).collect();
        let secret_files = build_globset(&patterns)?;
        let excludes = build_globset(&config.exclude_globs)?;
        Ok(Self {
            root: root.into(),
            config,
            secret_files,
            excludes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `file_name` (lowercase) names secret material.
    pub fn is_secret_file(&self, file_name: &str) -> bool {
        if ENV_TEMPLATES.contains(&file_name) {
            return false;
        }
        self.secret_files.is_match(file_name)
    }

    fn is_supported(&self, extension: &str, file_name: &str) -> bool {
        if extension.is_empty() {
            return self.config.file_names.iter().any(|n| n == file_name);
        }
        self.config.extensions.iter().any(|e| e == extension)
    }

    /// Walk the root and return the accepted files.
    ///
    /// Fails only when the root itself is unusable; unreadable entries below
    /// it are skipped.
    pub fn crawl(&self) -> Result<FileList> {
        if !self.root.is_dir() {
            bail!("Repository root is not a directory: {}", self.root.display());
        }
        std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read repository root: {}", self.root.display()))?;

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .follow_links(self.config.follow_symlinks)
            .hidden(false)
            .parents(false)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                if PRUNED_DIRS.contains(&name.as_ref()) {
                    return false;
                }
                !(name.starts_with('.') && name != ".github")
            });

        let mut stats = CrawlStats::default();
        let mut files = Vec::new();

        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            stats.files_seen += 1;

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();

            if self.is_secret_file(&file_name) {
                stats.skipped_secret += 1;
                continue;
            }
            if self.excludes.is_match(&rel_str) {
                stats.skipped_glob += 1;
                continue;
            }
            if !self.is_supported(&extension, &file_name) {
                stats.skipped_extension += 1;
                continue;
            }
            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(_) => continue,
            };
            if size > self.config.max_file_size {
                stats.skipped_size += 1;
                continue;
            }

            stats.files_accepted += 1;
            stats.total_bytes += size;
            *stats.by_extension.entry(extension.clone()).or_insert(0) += 1;
            files.push(FileRecord {
                path: path.to_path_buf(),
                relative_path: rel_str,
                size,
                extension,
                is_dir: false,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        info!(
            root = %self.root.display(),
            accepted = stats.files_accepted,
            seen = stats.files_seen,
            "crawl finished"
        );

        Ok(FileList {
            root: self.root.clone(),
            files,
            stats,
        })
    }

    /// Read a crawled file, lossily decoded and secret-redacted.
    pub async fn read_file(&self, record: &FileRecord, ctx: &RunContext) -> Result<String> {
        let bytes = tokio::select! {
            _ = ctx.cancelled() => bail!("read cancelled: {}", record.relative_path),
            read = tokio::fs::read(&record.path) => read
                .with_context(|| format!("Failed to read {}", record.relative_path))?,
        };
        Ok(redact(&String::from_utf8_lossy(&bytes)))
    }

    /// Read at most `max_bytes` of a crawled file, secret-redacted and cut
    /// on a char boundary.
    pub async fn read_head(
        &self,
        record: &FileRecord,
        max_bytes: usize,
        ctx: &RunContext,
    ) -> Result<String> {
        let read = async {
            let file = tokio::fs::File::open(&record.path).await?;
            let limit = max_bytes.saturating_add(HEAD_MARGIN);
            let mut head = Vec::with_capacity(limit.min(64 * 1024));
            file.take(limit as u64).read_to_end(&mut head).await?;
            Ok::<_, std::io::Error>(head)
        };
        let bytes = tokio::select! {
            _ = ctx.cancelled() => bail!("read cancelled: {}", record.relative_path),
            read = read => read
                .with_context(|| format!("Failed to read {}", record.relative_path))?,
        };
        let text = redact(&String::from_utf8_lossy(&bytes));
        Ok(truncate_chars(&text, max_bytes))
    }

    /// Content map of the important files, each truncated to `max_bytes`.
    /// Unreadable files are left out.
    pub async fn important_files(
        &self,
        list: &FileList,
        max_bytes: usize,
        ctx: &RunContext,
    ) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for record in list.files.iter().filter(|f| is_important_file(&f.file_name())) {
            match self.read_head(record, max_bytes, ctx).await {
                Ok(text) => {
                    out.insert(record.relative_path.clone(), text);
                }
                Err(_) if ctx.is_done() => bail!("important file scan cancelled"),
                Err(e) => debug!(path = %record.relative_path, error = %e, "important file unreadable"),
            }
        }
        Ok(out)
    }
}

/// True for manifests, workspace files, READMEs, Dockerfiles and compose files.
pub fn is_important_file(file_name: &str) -> bool {
    IMPORTANT_FILE_NAMES.contains(&file_name)
        || file_name.starts_with("readme")
        || (file_name.starts_with("docker-compose")
            && (file_name.ends_with(".yml") || file_name.ends_with(".yaml")))
}

/// Truncate to at most `max_bytes` bytes on a char boundary.
pub fn truncate_chars(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
