//! End-to-end analysis pipeline.
//!
//! One [`Orchestrator::run`] call drives a repository through every stage
//! and reports on a [`ProgressSink`]:
//!
//! | Stage | Progress | Work |
//! |-------|----------|------|
//! | `discover` | 0–5 | clone (remote targets), crawl |
//! | `detect` | 5–10 | project type from markers and important files |
//! | `map` | 10–60 | one LLM summary per file on a worker pool |
//! | `folders` | 60–75 | one summary per parent directory |
//! | `project` | 75–80 | project summary over the folder summaries |
//! | `details` | 80–85 | architecture / layout deep dive |
//! | `services` | 85–90 | monorepo service discovery and relationships |
//! | `schema` | 90–95 | DDL fold of SQL migrations |
//! | `secrets` | 95–99 | configuration-secret inventory |
//!
//! Per-item failures become `warning` events and the item is left out.
//! Input errors, crawl failures and cancellation end the run with a single
//! `error` event; otherwise the run ends with a `complete` event carrying
//! the [`AnalysisResult`]. LLM calls are never retried here: throttling is
//! absorbed by the rate limiter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{folder_hash_input, project_hash_input, CacheKind, SummaryCache};
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::connector_git::{self, is_remote_url};
use crate::context::RunContext;
use crate::crawler::{truncate_chars, Crawler};
use crate::ddl::{self, Migration};
use crate::error::{CloneError, LlmError, PipelineError};
use crate::llm::{ChatClient, LlmAdapter};
use crate::models::{
    AnalysisResult, FileList, FileRecord, FileSummary, FolderSummary, ProjectSummary, RepoLayout,
    ROOT_FOLDER,
};
use crate::progress::{ErrorKind, ProgressSink};
use crate::rate_limit::RateLimiter;
use crate::services::{is_service_file, save_graph};
use crate::traits::Strategies;

/// What to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local(PathBuf),
    Remote { url: String, token: Option<String> },
}

impl Target {
    /// A git URL becomes a remote target; anything else is a local path.
    pub fn parse(target: &str, token: Option<String>) -> Self {
        if is_remote_url(target) {
            Target::Remote {
                url: target.to_string(),
                token,
            }
        } else {
            Target::Local(PathBuf::from(target))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Discover,
    Detect,
    Map,
    Folders,
    Project,
    Details,
    Services,
    Schema,
    Secrets,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Discover => "discover",
            Stage::Detect => "detect",
            Stage::Map => "map",
            Stage::Folders => "folders",
            Stage::Project => "project",
            Stage::Details => "details",
            Stage::Services => "services",
            Stage::Schema => "schema",
            Stage::Secrets => "secrets",
        }
    }

    fn span(self) -> (u8, u8) {
        match self {
            Stage::Discover => (0, 5),
            Stage::Detect => (5, 10),
            Stage::Map => (10, 60),
            Stage::Folders => (60, 75),
            Stage::Project => (75, 80),
            Stage::Details => (80, 85),
            Stage::Services => (85, 90),
            Stage::Schema => (90, 95),
            Stage::Secrets => (95, 99),
        }
    }

    fn end(self) -> u8 {
        self.span().1
    }

    /// Progress after `done` of `total` items.
    fn at(self, done: usize, total: usize) -> u8 {
        let (lo, hi) = self.span();
        if total == 0 {
            return hi;
        }
        let step = (hi - lo) as usize * done.min(total) / total;
        lo + step as u8
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn error_kind(err: &PipelineError) -> ErrorKind {
    match err {
        PipelineError::Cancelled | PipelineError::ProgressClosed => ErrorKind::Cancelled,
        PipelineError::Input(_)
        | PipelineError::Clone(CloneError::InvalidUrl(_))
        | PipelineError::Clone(CloneError::PrivateRepository(_)) => ErrorKind::Input,
        PipelineError::Crawl(_) | PipelineError::Clone(_) => ErrorKind::Internal,
    }
}

/// LLM failures caused by cancellation end the run; everything else is a
/// per-item warning.
fn llm_failure(err: LlmError) -> Result<String, PipelineError> {
    if err.is_cancellation() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(err.to_string())
    }
}

/// `.sql` files below a directory whose name mentions migrations.
fn is_migration(record: &FileRecord) -> bool {
    record.extension == "sql"
        && record.parent_dir().is_some_and(|dir| {
            dir.split('/')
                .any(|c| c.to_lowercase().contains("migration"))
        })
}

// ═══════════════════════════════════════════════════════════════════════
// Run state
// ═══════════════════════════════════════════════════════════════════════

/// Mutable state of one run: the progress sink and the result builder.
struct Run {
    ctx: RunContext,
    sink: ProgressSink,
    stage: Stage,
    stage_started: Instant,
    result: AnalysisResult,
}

impl Run {
    fn check(&self) -> Result<(), PipelineError> {
        if self.ctx.is_done() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A vanished consumer cancels the run.
    fn guard(&self, sent: Result<(), PipelineError>) -> Result<(), PipelineError> {
        if let Err(PipelineError::ProgressClosed) = &sent {
            self.ctx.cancel();
        }
        sent
    }

    async fn enter(&mut self, stage: Stage, message: impl Into<String>) -> Result<(), PipelineError> {
        if stage != self.stage {
            info!(
                stage = self.stage.label(),
                elapsed_ms = self.stage_started.elapsed().as_millis() as u64,
                "stage finished"
            );
            self.stage = stage;
            self.stage_started = Instant::now();
        }
        self.check()?;
        self.progress(stage.span().0, message).await
    }

    async fn progress(&mut self, pct: u8, message: impl Into<String>) -> Result<(), PipelineError> {
        let sent = self.sink.progress(self.stage.label(), pct, message).await;
        self.guard(sent)
    }

    async fn data(
        &mut self,
        pct: u8,
        message: impl Into<String>,
        data: Value,
    ) -> Result<(), PipelineError> {
        let sent = self.sink.data(self.stage.label(), pct, message, data).await;
        self.guard(sent)
    }

    async fn warn(&mut self, message: impl Into<String>, data: Option<Value>) -> Result<(), PipelineError> {
        let message = message.into();
        warn!(stage = self.stage.label(), "{}", message);
        self.result.warnings += 1;
        let sent = self.sink.warning(self.stage.label(), message, data).await;
        self.guard(sent)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Map workers
// ═══════════════════════════════════════════════════════════════════════

enum MapOutcome {
    Summarized { summary: FileSummary, cached: bool },
    Failed(String),
    Cancelled,
}

#[derive(Clone)]
struct MapWorker {
    ctx: RunContext,
    crawler: Arc<Crawler>,
    adapter: Arc<LlmAdapter>,
    cache: SummaryCache,
    max_tokens: usize,
}

impl MapWorker {
    async fn summarize(&self, record: &FileRecord) -> MapOutcome {
        if self.ctx.is_done() {
            return MapOutcome::Cancelled;
        }
        let content = match self.crawler.read_file(record, &self.ctx).await {
            Ok(c) => c,
            Err(_) if self.ctx.is_done() => return MapOutcome::Cancelled,
            Err(e) => return MapOutcome::Failed(format!("{:#}", e)),
        };

        let key = record.path.to_string_lossy();
        if let Some(summary) = self.cache.get(CacheKind::File, &key, &content).await {
            return MapOutcome::Summarized {
                summary,
                cached: true,
            };
        }

        let chunks = chunk_text(&content, self.max_tokens);
        let first = chunks.first().map(|c| c.text.as_str()).unwrap_or_default();
        match self
            .adapter
            .analyze_file(&self.ctx, &record.relative_path, first, chunks.len())
            .await
        {
            Ok(summary) => {
                if let Err(e) = self.cache.set(CacheKind::File, &key, &content, &summary).await {
                    warn!(path = %record.relative_path, error = %e, "file cache write failed");
                }
                MapOutcome::Summarized {
                    summary,
                    cached: false,
                }
            }
            Err(e) if e.is_cancellation() => {
                debug!(path = %record.relative_path, reason = %e, "file skipped: run cancelled");
                MapOutcome::Cancelled
            }
            Err(e) => MapOutcome::Failed(e.to_string()),
        }
    }

    async fn run(
        self,
        id: usize,
        jobs: Arc<Mutex<mpsc::Receiver<FileRecord>>>,
        results: mpsc::Sender<(String, MapOutcome)>,
    ) {
        debug!(worker = id, "map worker started");
        loop {
            let next = {
                let mut jobs = jobs.lock().await;
                tokio::select! {
                    biased;
                    _ = self.ctx.cancelled() => None,
                    job = jobs.recv() => job,
                }
            };
            let Some(record) = next else { break };
            let outcome = self.summarize(&record).await;
            if results.send((record.relative_path, outcome)).await.is_err() {
                break;
            }
        }
        debug!(worker = id, "map worker stopped");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════

/// Runs analyses. Cheap to share: one instance serves concurrent runs, and
/// they all draw from the same rate limiter.
pub struct Orchestrator {
    config: Config,
    client: Arc<dyn ChatClient>,
    limiter: Arc<RateLimiter>,
    cache: SummaryCache,
    strategies: Strategies,
}

impl Orchestrator {
    pub fn new(config: Config, client: Arc<dyn ChatClient>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let cache = SummaryCache::from_config(&config.cache);
        Self {
            config,
            client,
            limiter,
            cache,
            strategies: Strategies::default(),
        }
    }

    pub fn with_strategies(mut self, strategies: Strategies) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_cache(mut self, cache: SummaryCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh context bounded by the configured pipeline deadline.
    pub fn context(&self) -> RunContext {
        RunContext::with_timeout(Default::default(), self.config.pipeline.deadline())
    }

    /// Analyze `target`, reporting on `sink`. Exactly one terminal event is
    /// emitted; the returned value mirrors it.
    pub async fn run(
        &self,
        ctx: &RunContext,
        target: Target,
        sink: ProgressSink,
    ) -> Result<AnalysisResult, PipelineError> {
        let source_url = match &target {
            Target::Remote { url, .. } => Some(url.clone()),
            Target::Local(_) => None,
        };
        let mut run = Run {
            ctx: ctx.clone(),
            sink: sink.bind(ctx),
            stage: Stage::Discover,
            stage_started: Instant::now(),
            result: AnalysisResult::new(String::new(), source_url),
        };
        let adapter = Arc::new(LlmAdapter::new(
            self.client.clone(),
            self.limiter.clone(),
            self.config.llm.temperature,
        ));

        let outcome = self.stages(&mut run, &adapter, &target).await;
        run.result.llm_calls = adapter.requests_sent();
        let Run {
            sink,
            stage,
            result,
            ..
        } = run;

        match outcome {
            Ok(()) => {
                info!(
                    run_id = %result.run_id,
                    files = result.file_summaries.len(),
                    warnings = result.warnings,
                    llm_calls = result.llm_calls,
                    "analysis complete"
                );
                sink.complete(to_json(&result)).await?;
                Ok(result)
            }
            Err(err) => {
                let err = match err {
                    PipelineError::Crawl(_) | PipelineError::Input(_) | PipelineError::Clone(_) => err,
                    _ if ctx.is_done() => PipelineError::Cancelled,
                    other => other,
                };
                warn!(run_id = %result.run_id, stage = stage.label(), error = %err, "analysis failed");
                // The consumer may already be gone; nothing left to report to.
                let _ = sink.error(stage.label(), error_kind(&err), err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn stages(
        &self,
        run: &mut Run,
        adapter: &Arc<LlmAdapter>,
        target: &Target,
    ) -> Result<(), PipelineError> {
        let root = self.resolve(run, target).await?;
        run.result.project_path = root.display().to_string();

        let crawler = Arc::new(
            Crawler::new(&root, self.config.crawler.clone()).map_err(PipelineError::Crawl)?,
        );
        let files = self.discover(run, &crawler).await?;
        let important = self.detect(run, &crawler, &files).await?;

        self.map(run, &crawler, adapter, &files).await?;
        let folders = self.folders(run, adapter).await?;
        self.project(run, adapter, folders, &important).await?;
        self.services(run, &crawler, &files).await?;
        self.schema(run, &crawler, &files).await?;
        self.secrets(run, &root).await?;
        run.check()
    }

    async fn resolve(&self, run: &mut Run, target: &Target) -> Result<PathBuf, PipelineError> {
        match target {
            Target::Local(path) => tokio::fs::canonicalize(path)
                .await
                .ok()
                .filter(|p| p.is_dir())
                .ok_or_else(|| {
                    PipelineError::Input(format!("not a readable directory: {}", path.display()))
                }),
            Target::Remote { url, token } => {
                run.enter(Stage::Discover, format!("cloning {}", url)).await?;
                let dest = connector_git::checkout_dir(&self.config.git.clone_dir, url);
                let cloned = tokio::select! {
                    _ = run.ctx.cancelled() => return Err(PipelineError::Cancelled),
                    cloned = connector_git::clone_repository(
                        url,
                        &dest,
                        token.as_deref(),
                        self.config.git.shallow,
                    ) => cloned?,
                };
                Ok(cloned)
            }
        }
    }

    async fn discover(&self, run: &mut Run, crawler: &Arc<Crawler>) -> Result<FileList, PipelineError> {
        run.enter(Stage::Discover, "crawling repository").await?;
        let walker = crawler.clone();
        let files = tokio::task::spawn_blocking(move || walker.crawl())
            .await
            .map_err(|e| PipelineError::Crawl(e.into()))?
            .map_err(PipelineError::Crawl)?;
        if files.is_empty() {
            return Err(PipelineError::Input(format!(
                "no analyzable files under {}",
                crawler.root().display()
            )));
        }
        run.result.stats = Some(files.stats.clone());
        run.data(
            Stage::Discover.end(),
            format!("found {} files", files.len()),
            to_json(&files.stats),
        )
        .await?;
        Ok(files)
    }

    async fn detect(
        &self,
        run: &mut Run,
        crawler: &Crawler,
        files: &FileList,
    ) -> Result<BTreeMap<String, String>, PipelineError> {
        run.enter(Stage::Detect, "detecting project type").await?;
        let important = match crawler
            .important_files(files, self.config.pipeline.important_file_bytes, &run.ctx)
            .await
        {
            Ok(important) => important,
            Err(_) if run.ctx.is_done() => return Err(PipelineError::Cancelled),
            Err(e) => {
                run.warn(format!("important file scan failed: {:#}", e), None).await?;
                BTreeMap::new()
            }
        };
        match self.strategies.detector.detect(files, &important).await {
            Ok(detection) => {
                let message = format!(
                    "{} project (confidence {:.1})",
                    detection.primary.as_str(),
                    detection.confidence
                );
                run.data(Stage::Detect.end(), message, to_json(&detection)).await?;
                run.result.detection = Some(detection);
            }
            Err(e) => run.warn(format!("project type detection failed: {:#}", e), None).await?,
        }
        Ok(important)
    }

    async fn map(
        &self,
        run: &mut Run,
        crawler: &Arc<Crawler>,
        adapter: &Arc<LlmAdapter>,
        files: &FileList,
    ) -> Result<(), PipelineError> {
        let total = files.len();
        run.enter(Stage::Map, format!("analyzing {} files", total)).await?;

        let workers = self.config.pipeline.workers.clamp(1, total.max(1));
        let (job_tx, job_rx) = mpsc::channel::<FileRecord>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel(workers * 2);

        let feeder = {
            let ctx = run.ctx.clone();
            let records = files.files.clone();
            tokio::spawn(async move {
                for record in records {
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        sent = job_tx.send(record) => if sent.is_err() { break },
                    }
                }
            })
        };

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = MapWorker {
                    ctx: run.ctx.clone(),
                    crawler: crawler.clone(),
                    adapter: adapter.clone(),
                    cache: self.cache.clone(),
                    max_tokens: self.config.chunking.max_tokens,
                };
                tokio::spawn(worker.run(id, job_rx.clone(), result_tx.clone()))
            })
            .collect();
        drop(result_tx);

        let every = self.config.pipeline.progress_every.max(1);
        let (mut done, mut cached) = (0usize, 0usize);
        let mut failure = None;
        while let Some((path, outcome)) = result_rx.recv().await {
            if failure.is_some() {
                continue;
            }
            done += 1;
            let step = match outcome {
                MapOutcome::Summarized { summary, cached: hit } => {
                    cached += usize::from(hit);
                    run.result.file_summaries.insert(path, summary);
                    Ok(())
                }
                MapOutcome::Failed(message) => {
                    let data = json!({ "path": path });
                    run.warn(format!("{}: {}", path, message), Some(data)).await
                }
                MapOutcome::Cancelled => {
                    debug!(path = %path, "file not summarized before cancellation");
                    Ok(())
                }
            };
            let step = match step {
                Ok(()) if done % every == 0 || done == total => {
                    let message = format!("analyzed {}/{} files", done, total);
                    run.progress(Stage::Map.at(done, total), message).await
                }
                other => other,
            };
            if let Err(e) = step {
                run.ctx.cancel();
                failure = Some(e);
            }
        }

        let _ = feeder.await;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "map worker panicked");
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        run.check()?;
        info!(
            files = total,
            summarized = run.result.file_summaries.len(),
            cached,
            "map stage done"
        );
        Ok(())
    }

    async fn folders(
        &self,
        run: &mut Run,
        adapter: &LlmAdapter,
    ) -> Result<BTreeMap<String, FolderSummary>, PipelineError> {
        let mut grouped: BTreeMap<String, BTreeMap<String, FileSummary>> = BTreeMap::new();
        for (path, summary) in &run.result.file_summaries {
            let folder = path.rsplit_once('/').map_or(ROOT_FOLDER, |(dir, _)| dir);
            grouped
                .entry(folder.to_string())
                .or_default()
                .insert(path.clone(), summary.clone());
        }
        let total = grouped.len();
        run.enter(Stage::Folders, format!("summarizing {} folders", total)).await?;

        let mut folders = BTreeMap::new();
        for (i, (folder, files)) in grouped.into_iter().enumerate() {
            let key = format!("{}/{}", run.result.project_path, folder);
            let hash_input = folder_hash_input(&files);
            let summary = match self.cache.get(CacheKind::Folder, &key, &hash_input).await {
                Some(hit) => hit,
                None => match adapter.analyze_folder(&run.ctx, &folder, &files).await {
                    Ok(summary) => {
                        if let Err(e) = self.cache.set(CacheKind::Folder, &key, &hash_input, &summary).await {
                            warn!(folder = %folder, error = %e, "folder cache write failed");
                        }
                        summary
                    }
                    Err(e) => {
                        let message = llm_failure(e)?;
                        run.warn(format!("folder {}: {}", folder, message), Some(json!({ "folder": folder })))
                            .await?;
                        continue;
                    }
                },
            };
            let data = json!({
                "path": summary.path,
                "purpose": summary.purpose,
                "files": summary.files.len(),
            });
            run.data(Stage::Folders.at(i + 1, total), format!("folder {}", folder), data)
                .await?;
            folders.insert(folder, summary);
        }
        Ok(folders)
    }

    /// Project summary plus the detailed analysis; cached together.
    async fn project(
        &self,
        run: &mut Run,
        adapter: &LlmAdapter,
        folders: BTreeMap<String, FolderSummary>,
        important: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        run.enter(Stage::Project, "summarizing project").await?;
        if folders.is_empty() {
            return run.warn("no folder summaries; project summary skipped", None).await;
        }

        let (key, hash_input) = match (&run.result.source_url, self.config.cache.url_keyed_projects) {
            (Some(url), true) => (url.clone(), url.clone()),
            _ => (run.result.project_path.clone(), project_hash_input(&folders)),
        };
        let cached: Option<ProjectSummary> = self.cache.get(CacheKind::Project, &key, &hash_input).await;
        // Hits keep their timestamp unless details get attached below.
        let mut fresh = cached.is_none();
        let mut project = match cached {
            Some(hit) => hit,
            None => match adapter.analyze_project(&run.ctx, &run.result.project_path, &folders).await {
                Ok(summary) => summary,
                Err(e) => {
                    let message = llm_failure(e)?;
                    return run.warn(format!("project summary failed: {}", message), None).await;
                }
            },
        };
        run.data(
            Stage::Project.end(),
            "project summarized",
            json!({ "purpose": project.purpose, "architecture": project.architecture }),
        )
        .await?;

        run.enter(Stage::Details, "analyzing repository structure").await?;
        if project.detailed.is_none() {
            match adapter
                .analyze_repository_details(&run.ctx, &folders, &run.result.file_summaries, important)
                .await
            {
                Ok(details) => {
                    project.detailed = Some(details);
                    fresh = true;
                }
                Err(e) => {
                    let message = llm_failure(e)?;
                    run.warn(format!("detailed analysis failed: {}", message), None).await?;
                }
            }
        }
        if let Some(details) = &project.detailed {
            run.data(Stage::Details.end(), "repository structure analyzed", to_json(details))
                .await?;
        }

        if fresh {
            if let Err(e) = self.cache.set(CacheKind::Project, &key, &hash_input, &project).await {
                warn!(error = %e, "project cache write failed");
            }
        }
        run.result.project = Some(project);
        Ok(())
    }

    async fn services(
        &self,
        run: &mut Run,
        crawler: &Crawler,
        files: &FileList,
    ) -> Result<(), PipelineError> {
        run.enter(Stage::Services, "looking for services").await?;
        let monorepo = run
            .result
            .project
            .as_ref()
            .and_then(|p| p.detailed.as_ref())
            .is_some_and(|d| d.layout == RepoLayout::Monorepo);
        if !monorepo {
            return run.progress(Stage::Services.end(), "single repository; skipped").await;
        }

        let max_bytes = self.config.pipeline.max_service_content_bytes;
        let mut contents = BTreeMap::new();
        for record in files.files.iter().filter(|f| is_service_file(&f.relative_path)) {
            match crawler.read_file(record, &run.ctx).await {
                Ok(text) => {
                    contents.insert(record.relative_path.clone(), truncate_chars(&text, max_bytes));
                }
                Err(e) => debug!(path = %record.relative_path, error = %e, "service file unreadable"),
            }
        }
        run.check()?;
        let folder_list: Vec<String> = files
            .folders()
            .into_iter()
            .filter(|f| f != ROOT_FOLDER)
            .collect();

        let services = match self.strategies.services.discover(&contents, &folder_list).await {
            Ok(services) => services,
            Err(e) => return run.warn(format!("service discovery failed: {:#}", e), None).await,
        };
        run.data(
            Stage::Services.at(1, 2),
            format!("{} services discovered", services.len()),
            to_json(&services),
        )
        .await?;

        if services.len() > 1 {
            match self.strategies.relationships.discover(&services, &contents).await {
                Ok(graph) => {
                    if self.config.cache.enabled {
                        let dir = &self.config.cache.relationships_dir;
                        if let Err(e) = save_graph(dir, &run.result.project_path, &graph).await {
                            warn!(error = %e, "service graph write failed");
                        }
                    }
                    run.data(
                        Stage::Services.end(),
                        format!("{} service relationships", graph.relationships.len()),
                        to_json(&graph),
                    )
                    .await?;
                    run.result.service_graph = Some(graph);
                }
                Err(e) => run.warn(format!("relationship discovery failed: {:#}", e), None).await?,
            }
        }
        run.result.services = Some(services);
        Ok(())
    }

    async fn schema(
        &self,
        run: &mut Run,
        crawler: &Crawler,
        files: &FileList,
    ) -> Result<(), PipelineError> {
        run.enter(Stage::Schema, "extracting database schema").await?;
        let has_database = run
            .result
            .detection
            .as_ref()
            .is_some_and(|d| d.primary.has_database());
        if !has_database {
            return run.progress(Stage::Schema.end(), "no database expected; skipped").await;
        }

        let mut migrations = Vec::new();
        for record in files.files.iter().filter(|f| is_migration(f)) {
            let name = record
                .relative_path
                .rsplit('/')
                .next()
                .unwrap_or(&record.relative_path);
            match crawler.read_file(record, &run.ctx).await {
                Ok(sql) => migrations.push(Migration::new(name, sql)),
                Err(e) => {
                    run.check()?;
                    run.warn(format!("migration {}: {:#}", record.relative_path, e), None).await?;
                }
            }
        }
        if migrations.is_empty() {
            return run.progress(Stage::Schema.end(), "no migrations found").await;
        }

        let outcome = ddl::reduce(migrations);
        let total = outcome.checkpoints.len();
        for (i, checkpoint) in outcome.checkpoints.iter().enumerate() {
            run.data(
                Stage::Schema.at(i + 1, total),
                format!("applied {}", checkpoint.migration),
                to_json(checkpoint),
            )
            .await?;
        }
        for warning in &outcome.warnings {
            let data = json!({
                "migration": warning.migration,
                "statement_index": warning.statement_index,
            });
            run.warn(warning.to_string(), Some(data)).await?;
        }

        match outcome.into_report() {
            Ok(report) => {
                let message = format!("{} tables extracted", report.schema.tables().len());
                let data = json!({
                    "tables": report.schema.tables().len(),
                    "enums": report.schema.enums().len(),
                    "views": report.schema.views().len(),
                });
                run.data(Stage::Schema.end(), message, data).await?;
                run.result.schema = Some(report);
            }
            Err(e) => run.warn(e.to_string(), None).await?,
        }
        Ok(())
    }

    async fn secrets(&self, run: &mut Run, root: &Path) -> Result<(), PipelineError> {
        run.enter(Stage::Secrets, "inventorying configuration secrets").await?;
        match self.strategies.secrets.extract(root).await {
            Ok(report) => {
                let count = report.global_secrets.len()
                    + report.services.iter().map(|s| s.secrets.len()).sum::<usize>();
                run.data(Stage::Secrets.end(), format!("{} secrets found", count), to_json(&report))
                    .await?;
                run.result.secrets = Some(report);
            }
            Err(e) => run.warn(format!("secret extraction failed: {:#}", e), None).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_progress_stays_inside_its_span() {
        assert_eq!(Stage::Map.at(0, 10), 10);
        assert_eq!(Stage::Map.at(5, 10), 35);
        assert_eq!(Stage::Map.at(10, 10), 60);
        assert_eq!(Stage::Map.at(12, 10), 60);
        assert_eq!(Stage::Folders.at(1, 0), 75);
        assert!(Stage::Secrets.end() < 100);
    }

    #[test]
    fn targets_parse_by_shape() {
        assert_eq!(
            Target::parse("./repo", None),
            Target::Local(PathBuf::from("./repo"))
        );
        assert!(matches!(
            Target::parse("https://github.com/acme/shop", Some("t".into())),
            Target::Remote { token: Some(_), .. }
        ));
    }

    #[test]
    fn migrations_live_under_migration_dirs() {
        let record = |rel: &str| FileRecord {
            path: PathBuf::from("/r").join(rel),
            relative_path: rel.to_string(),
            size: 1,
            extension: rel.rsplit('.').next().unwrap_or_default().to_string(),
            is_dir: false,
        };
        assert!(is_migration(&record("db/migrations/001.sql")));
        assert!(is_migration(&record("DB_Migration_Files/x/002.sql")));
        assert!(!is_migration(&record("db/seed.sql")));
        assert!(!is_migration(&record("migrations/README.md")));
        assert!(!is_migration(&record("001.sql")));
    }

    #[test]
    fn error_kinds_follow_the_failure() {
        assert_eq!(error_kind(&PipelineError::Cancelled), ErrorKind::Cancelled);
        assert_eq!(error_kind(&PipelineError::ProgressClosed), ErrorKind::Cancelled);
        assert_eq!(error_kind(&PipelineError::Input("x".into())), ErrorKind::Input);
        assert_eq!(
            error_kind(&PipelineError::Clone(CloneError::PrivateRepository("x".into()))),
            ErrorKind::Input
        );
        assert_eq!(
            error_kind(&PipelineError::Clone(CloneError::Git("x".into()))),
            ErrorKind::Internal
        );
    }
}
