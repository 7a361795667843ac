use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use repo_explainer::config::Config;
use repo_explainer::context::RunContext;
use repo_explainer::error::{LlmError, PipelineError};
use repo_explainer::llm::{ChatClient, ChatRequest};
use repo_explainer::models::{AnalysisResult, ProjectType};
use repo_explainer::orchestrator::{Orchestrator, Target};
use repo_explainer::progress::{self, EventKind, ProgressEvent};

const FILE_JSON: &str = r#"{"language":"rust","purpose":"does a thing","key_types":[],
    "functions":["run"],"imports":[],"side_effects":[],"risks":[],"complexity":"low"}"#;
const FOLDER_JSON: &str = r#"{"purpose":"source folder","languages":{"rust":2},
    "key_modules":["main"],"dependencies":[],"architecture":"layered"}"#;
const PROJECT_JSON: &str = r#"{"purpose":"a demo","architecture":"cli",
    "data_models":[],"external_services":[],"languages":{"rust":2}}"#;
const DETAILS_JSON: &str = r#"{"summary":"demo tool","architecture":"monolith",
    "layout":"single-repo","main_stacks":["rust"],"monorepo_services":[],
    "evidence_paths":["src/main.rs"],"confidence":0.8}"#;

/// Answers every prompt with a valid response and counts the calls.
#[derive(Default)]
struct MockClient {
    calls: AtomicUsize,
    delay: Duration,
    broken_path: Option<&'static str>,
}

#[async_trait]
impl ChatClient for MockClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let system = request.system.as_str();
        let reply = if system.starts_with("You analyze one source file") {
            match self.broken_path {
                Some(p) if request.user.starts_with(&format!("File: {}", p)) => "not json",
                _ => FILE_JSON,
            }
        } else if system.starts_with("You summarize one directory") {
            FOLDER_JSON
        } else if system.starts_with("You summarize a whole repository") {
            PROJECT_JSON
        } else {
            DETAILS_JSON
        };
        Ok(reply.to_string())
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config(tmp: &Path) -> Config {
    let mut config = Config::default();
    config.cache.dir = tmp.join("cache");
    config.cache.relationships_dir = tmp.join("cache/relationships");
    config.pipeline.workers = 2;
    config.pipeline.progress_every = 1;
    config
}

fn two_file_repo(tmp: &Path) -> std::path::PathBuf {
    let repo = tmp.join("repo");
    write(&repo, "src/main.rs", "fn main() { demo::run(); }\n");
    write(&repo, "src/lib.rs", "pub fn run() {}\n");
    repo
}

async fn analyze(
    orchestrator: &Orchestrator,
    ctx: &RunContext,
    target: &Path,
) -> (Result<AnalysisResult, PipelineError>, Vec<ProgressEvent>) {
    let (sink, stream) = progress::channel(orchestrator.config().pipeline.bus_capacity);
    let collector = tokio::spawn(stream.collect());
    let result = orchestrator
        .run(ctx, Target::Local(target.to_path_buf()), sink)
        .await;
    (result, collector.await.unwrap())
}

fn terminal(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
    events.iter().filter(|e| e.kind.is_terminal()).collect()
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());

    let first_client = Arc::new(MockClient::default());
    let first = Orchestrator::new(config(tmp.path()), first_client.clone());
    let (result, _) = analyze(&first, &first.context(), &repo).await;
    let first_result = result.unwrap();
    // two files, one folder, project, details
    assert_eq!(first_client.calls.load(Ordering::SeqCst), 5);
    assert_eq!(first_result.llm_calls, 5);

    let second_client = Arc::new(MockClient::default());
    let second = Orchestrator::new(config(tmp.path()), second_client.clone());
    let (result, events) = analyze(&second, &second.context(), &repo).await;
    let second_result = result.unwrap();
    assert_eq!(second_client.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_result.llm_calls, 0);
    assert_eq!(second_result.project, first_result.project);
    assert_eq!(second_result.file_summaries, first_result.file_summaries);
    assert_eq!(terminal(&events).len(), 1);
}

#[tokio::test]
async fn test_changed_file_is_summarized_again() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());

    let client = Arc::new(MockClient::default());
    let orchestrator = Orchestrator::new(config(tmp.path()), client.clone());
    analyze(&orchestrator, &orchestrator.context(), &repo).await.0.unwrap();
    let before = client.calls.load(Ordering::SeqCst);

    write(&repo, "src/lib.rs", "pub fn run() { println!(\"changed\"); }\n");
    let (result, _) = analyze(&orchestrator, &orchestrator.context(), &repo).await;
    // changed file, its folder, project, details
    assert_eq!(result.unwrap().llm_calls, 4);
    assert_eq!(client.calls.load(Ordering::SeqCst), before + 4);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_with_complete() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());
    let mut config = config(tmp.path());
    config.cache.enabled = false;

    let orchestrator = Orchestrator::new(config, Arc::new(MockClient::default()));
    let (result, events) = analyze(&orchestrator, &orchestrator.context(), &repo).await;
    result.unwrap();

    assert!(events
        .windows(2)
        .all(|pair| pair[0].progress <= pair[1].progress));
    let terminals = terminal(&events);
    assert_eq!(terminals.len(), 1);
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.progress, 100);
    assert!(last.data.as_ref().unwrap()["project"].is_object());
}

#[tokio::test]
async fn test_deadline_cancels_with_a_single_error_event() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());
    let mut config = config(tmp.path());
    config.cache.enabled = false;

    let client = Arc::new(MockClient {
        delay: Duration::from_secs(30),
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(config, client);
    let ctx = RunContext::with_timeout(CancellationToken::new(), Duration::from_secs(1));

    let started = std::time::Instant::now();
    let (result, events) = analyze(&orchestrator, &ctx, &repo).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(result, Err(PipelineError::Cancelled)));

    let terminals = terminal(&events);
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].kind, EventKind::Error);
    assert_eq!(terminals[0].data.as_ref().unwrap()["kind"], "cancelled");
    assert!(events.iter().all(|e| e.kind != EventKind::Complete));
}

#[tokio::test]
async fn test_failed_file_becomes_a_warning() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());
    let mut config = config(tmp.path());
    config.cache.enabled = false;

    let client = Arc::new(MockClient {
        broken_path: Some("src/lib.rs"),
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(config, client);
    let (result, events) = analyze(&orchestrator, &orchestrator.context(), &repo).await;
    let result = result.unwrap();

    assert_eq!(result.file_summaries.len(), 1);
    assert!(result.file_summaries.contains_key("src/main.rs"));
    assert!(result.warnings >= 1);
    assert!(events.iter().any(|e| e.kind == EventKind::Warning
        && e.data.as_ref().is_some_and(|d| d["path"] == "src/lib.rs")));
    assert_eq!(events.last().unwrap().kind, EventKind::Complete);
}

#[tokio::test]
async fn test_backend_repository_gets_a_schema() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("api");
    write(
        &repo,
        "go.mod",
        "module example.com/api\n\nrequire github.com/gin-gonic/gin v1.9.0\n",
    );
    write(&repo, "cmd/api/main.go", "package main\n\nfunc main() {}\n");
    write(
        &repo,
        "db/migrations/001_init.sql",
        "CREATE TABLE users (id UUID PRIMARY KEY, email TEXT UNIQUE NOT NULL);",
    );
    write(
        &repo,
        "db/migrations/002_orders.sql",
        "CREATE TABLE orders (id INT PRIMARY KEY, user_id UUID REFERENCES users(id));",
    );
    let mut config = config(tmp.path());
    config.cache.enabled = false;

    let orchestrator = Orchestrator::new(config, Arc::new(MockClient::default()));
    let (result, events) = analyze(&orchestrator, &orchestrator.context(), &repo).await;
    let result = result.unwrap();

    assert_eq!(result.detection.as_ref().unwrap().primary, ProjectType::Backend);
    let schema = result.schema.as_ref().unwrap();
    assert_eq!(schema.schema.tables().len(), 2);
    assert!(schema.erd.contains("users ||--o{ orders"));
    assert!(events
        .iter()
        .any(|e| e.stage == "schema" && e.message.starts_with("applied 001_init.sql")));
}

#[tokio::test]
async fn test_missing_directory_is_an_input_error() {
    let tmp = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(config(tmp.path()), Arc::new(MockClient::default()));
    let (result, events) =
        analyze(&orchestrator, &orchestrator.context(), &tmp.path().join("nope")).await;

    assert!(matches!(result, Err(PipelineError::Input(_))));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data.as_ref().unwrap()["kind"], "input");
}

fn project_entry(cache_dir: &Path) -> std::path::PathBuf {
    fs::read_dir(cache_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_string_lossy().contains("_project_"))
        .expect("project cache entry")
}

#[tokio::test]
async fn test_project_cache_hit_keeps_its_timestamp() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());
    let orchestrator = Orchestrator::new(config(tmp.path()), Arc::new(MockClient::default()));
    analyze(&orchestrator, &orchestrator.context(), &repo).await.0.unwrap();

    // age the entry to one hour short of the ttl
    let entry = project_entry(&tmp.path().join("cache"));
    let mut envelope: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&entry).unwrap()).unwrap();
    let aged = (Utc::now() - ChronoDuration::hours(167)).to_rfc3339();
    envelope["timestamp"] = serde_json::Value::String(aged.clone());
    fs::write(&entry, serde_json::to_string(&envelope).unwrap()).unwrap();

    let client = Arc::new(MockClient::default());
    let second = Orchestrator::new(config(tmp.path()), client.clone());
    let (result, _) = analyze(&second, &second.context(), &repo).await;
    assert!(result.unwrap().project.is_some());
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);

    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&entry).unwrap()).unwrap();
    assert_eq!(stored["timestamp"], serde_json::Value::String(aged));
}

#[tokio::test]
async fn test_stalled_consumer_does_not_outlive_the_deadline() {
    let tmp = TempDir::new().unwrap();
    let repo = two_file_repo(tmp.path());
    let mut config = config(tmp.path());
    config.cache.enabled = false;

    let orchestrator = Orchestrator::new(config, Arc::new(MockClient::default()));
    let ctx = RunContext::with_timeout(CancellationToken::new(), Duration::from_millis(200));
    let (sink, _stream) = progress::channel(1);

    let run = orchestrator.run(&ctx, Target::Local(repo), sink);
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run returned while the consumer was stalled");
    assert!(matches!(result, Err(PipelineError::Cancelled)));
}
