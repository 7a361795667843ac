//! LLM adapter: structured summaries from a chat-completion provider.
//!
//! Two layers:
//! - **[`ChatClient`]**: the provider seam. One request in, raw response
//!   text out. [`OpenAiChatClient`] speaks the OpenAI-compatible
//!   `POST /chat/completions` protocol with JSON-object responses.
//! - **[`LlmAdapter`]**: stateless façade used by the pipeline. Every
//!   operation waits on the [`RateLimiter`], sends one request with a fixed
//!   system prompt that declares the target JSON shape, and parses the reply
//!   strictly into the target type.
//!
//! There are no retries here. Transient throttling is absorbed by the rate
//! limiter and the orchestrator degrades permanent failures to warnings.
//!
//! # Error mapping
//!
//! - non-2xx status → [`LlmError::Provider`]
//! - connect/reset/timeout → [`LlmError::Network`]
//! - body is not JSON → [`LlmError::Parse`]
//! - JSON of the wrong shape → [`LlmError::Schema`]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::LlmConfig;
use crate::context::RunContext;
use crate::error::LlmError;
use crate::models::{
    Architecture, Complexity, DetailedAnalysis, FileSummary, FolderSummary, ProjectSummary,
    RepoLayout,
};
use crate::rate_limit::RateLimiter;

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask the provider for a JSON-object response.
    pub json_mode: bool,
}

/// Sends chat-completion requests to a language model provider.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Returns the raw assistant message content.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

// ============ OpenAI-compatible client ============

/// Chat client for OpenAI-compatible endpoints.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
    max_tokens: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| LlmError::MissingApiKey(self.api_key_env.clone()))?;

        let body = WireRequest {
            model: &self.model,
            messages: [
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: self.max_tokens,
            response_format: request
                .json_mode
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: WireResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::Parse(format!("provider envelope: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Schema("response has no message content".to_string()))
    }
}

// ============ Prompts ============

const FILE_SYSTEM_PROMPT: &str = r#"You analyze one source file and answer with a single JSON object:
{"language": string, "purpose": string, "key_types": [string], "functions": [string],
 "imports": [string], "side_effects": [string], "risks": [string],
 "complexity": "low" | "medium" | "high"}
Describe only what the code shows. Answer with JSON only."#;

const FOLDER_SYSTEM_PROMPT: &str = r#"You summarize one directory from the JSON summaries of its files and answer with a single JSON object:
{"purpose": string, "languages": {string: integer}, "key_modules": [string],
 "dependencies": [string], "architecture": string}
"languages" counts files per language. Answer with JSON only."#;

const PROJECT_SYSTEM_PROMPT: &str = r#"You summarize a whole repository from the JSON summaries of its directories and answer with a single JSON object:
{"purpose": string, "architecture": string, "data_models": [string],
 "external_services": [string], "languages": {string: integer}}
Answer with JSON only."#;

const DETAILS_SYSTEM_PROMPT: &str = r#"You classify a repository from directory summaries, file summaries and the head of its important files. Answer with a single JSON object:
{"summary": string (one line), "architecture": "monolith" | "microservices",
 "layout": "single-repo" | "monorepo", "main_stacks": [string],
 "monorepo_services": [string], "evidence_paths": [string],
 "confidence": number between 0 and 1}
Cite file paths from the input as evidence. Answer with JSON only."#;

// ============ Response shapes ============

#[derive(Deserialize)]
struct FileResponse {
    language: String,
    purpose: String,
    key_types: Vec<String>,
    functions: Vec<String>,
    imports: Vec<String>,
    side_effects: Vec<String>,
    risks: Vec<String>,
    complexity: Complexity,
}

#[derive(Deserialize)]
struct FolderResponse {
    purpose: String,
    languages: BTreeMap<String, usize>,
    key_modules: Vec<String>,
    dependencies: Vec<String>,
    architecture: String,
}

#[derive(Deserialize)]
struct ProjectResponse {
    purpose: String,
    architecture: String,
    data_models: Vec<String>,
    external_services: Vec<String>,
    languages: BTreeMap<String, usize>,
}

#[derive(Deserialize)]
struct DetailsResponse {
    summary: String,
    architecture: Architecture,
    layout: RepoLayout,
    main_stacks: Vec<String>,
    monorepo_services: Vec<String>,
    evidence_paths: Vec<String>,
    confidence: f64,
}

/// Parse `raw` as JSON, then into `T`.
fn parse_strict<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| LlmError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(LlmError::Schema("expected a JSON object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| LlmError::Schema(e.to_string()))
}

// ============ Adapter ============

/// Structured LLM operations used by the map and reduce stages.
pub struct LlmAdapter {
    client: Arc<dyn ChatClient>,
    limiter: Arc<RateLimiter>,
    temperature: f32,
    requests: AtomicU64,
}

impl LlmAdapter {
    pub fn new(client: Arc<dyn ChatClient>, limiter: Arc<RateLimiter>, temperature: f32) -> Self {
        Self {
            client,
            limiter,
            temperature: temperature.clamp(0.0, 0.1),
            requests: AtomicU64::new(0),
        }
    }

    /// Number of requests handed to the provider so far.
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &RunContext,
        request: ChatRequest,
    ) -> Result<T, LlmError> {
        self.limiter.acquire(ctx).await?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        let raw = tokio::select! {
            _ = ctx.cancelled() => return Err(LlmError::Cancelled),
            raw = self.client.complete(&request) => raw?,
        };
        parse_strict(&raw)
    }

    fn request(&self, system: &str, user: String, temperature: f32) -> ChatRequest {
        ChatRequest {
            system: system.to_string(),
            user,
            temperature,
            json_mode: true,
        }
    }

    /// Map step: summarize one file (or its first chunk).
    pub async fn analyze_file(
        &self,
        ctx: &RunContext,
        path: &str,
        content: &str,
        total_chunks: usize,
    ) -> Result<FileSummary, LlmError> {
        let note = if total_chunks > 1 {
            format!(
                "\nNOTE: this is chunk 1 of {}; the file continues beyond this excerpt.",
                total_chunks
            )
        } else {
            String::new()
        };
        let user = format!("File: {}{}\n\n```\n{}\n```", path, note, content);
        debug!(path, "analyze_file");
        let r: FileResponse = self
            .call(ctx, self.request(FILE_SYSTEM_PROMPT, user, self.temperature))
            .await?;
        Ok(FileSummary {
            language: r.language,
            purpose: r.purpose,
            key_types: r.key_types,
            functions: r.functions,
            imports: r.imports,
            side_effects: r.side_effects,
            risks: r.risks,
            complexity: r.complexity,
        })
    }

    /// Folder reduce step.
    pub async fn analyze_folder(
        &self,
        ctx: &RunContext,
        path: &str,
        files: &BTreeMap<String, FileSummary>,
    ) -> Result<FolderSummary, LlmError> {
        let payload = serde_json::to_string_pretty(files).unwrap_or_default();
        let user = format!("Directory: {}\n\nFile summaries:\n{}", path, payload);
        debug!(path, files = files.len(), "analyze_folder");
        let r: FolderResponse = self
            .call(ctx, self.request(FOLDER_SYSTEM_PROMPT, user, self.temperature))
            .await?;
        Ok(FolderSummary {
            path: path.to_string(),
            purpose: r.purpose,
            languages: r.languages,
            key_modules: r.key_modules,
            dependencies: r.dependencies,
            architecture: r.architecture,
            files: files.clone(),
        })
    }

    /// Project reduce step.
    pub async fn analyze_project(
        &self,
        ctx: &RunContext,
        path: &str,
        folders: &BTreeMap<String, FolderSummary>,
    ) -> Result<ProjectSummary, LlmError> {
        // Folder summaries without their nested file maps keep the prompt bounded.
        let compact: BTreeMap<&String, Value> = folders
            .iter()
            .map(|(k, f)| {
                (
                    k,
                    serde_json::json!({
                        "purpose": f.purpose,
                        "languages": f.languages,
                        "key_modules": f.key_modules,
                        "dependencies": f.dependencies,
                        "architecture": f.architecture,
                    }),
                )
            })
            .collect();
        let payload = serde_json::to_string_pretty(&compact).unwrap_or_default();
        let user = format!("Project: {}\n\nDirectory summaries:\n{}", path, payload);
        debug!(path, folders = folders.len(), "analyze_project");
        let r: ProjectResponse = self
            .call(ctx, self.request(PROJECT_SYSTEM_PROMPT, user, self.temperature))
            .await?;
        Ok(ProjectSummary {
            purpose: r.purpose,
            architecture: r.architecture,
            data_models: r.data_models,
            external_services: r.external_services,
            languages: r.languages,
            folders: folders.clone(),
            detailed: None,
        })
    }

    /// Repository classification at temperature 0.
    pub async fn analyze_repository_details(
        &self,
        ctx: &RunContext,
        folders: &BTreeMap<String, FolderSummary>,
        files: &BTreeMap<String, FileSummary>,
        important_files: &BTreeMap<String, String>,
    ) -> Result<DetailedAnalysis, LlmError> {
        let folder_purposes: BTreeMap<&String, &String> =
            folders.iter().map(|(k, f)| (k, &f.purpose)).collect();
        let file_purposes: BTreeMap<&String, &String> =
            files.iter().map(|(k, f)| (k, &f.purpose)).collect();
        let mut user = String::new();
        user.push_str("Directory summaries:\n");
        user.push_str(&serde_json::to_string_pretty(&folder_purposes).unwrap_or_default());
        user.push_str("\n\nFile summaries:\n");
        user.push_str(&serde_json::to_string_pretty(&file_purposes).unwrap_or_default());
        user.push_str("\n\nImportant files:\n");
        for (path, content) in important_files {
            user.push_str(&format!("--- {} ---\n{}\n", path, content));
        }
        let r: DetailsResponse = self
            .call(ctx, self.request(DETAILS_SYSTEM_PROMPT, user, 0.0))
            .await?;
        if !(0.0..=1.0).contains(&r.confidence) {
            return Err(LlmError::Schema(format!(
                "confidence {} outside [0, 1]",
                r.confidence
            )));
        }
        Ok(DetailedAnalysis {
            summary: r.summary,
            architecture: r.architecture,
            layout: r.layout,
            main_stacks: r.main_stacks,
            monorepo_services: r.monorepo_services,
            evidence_paths: r.evidence_paths,
            confidence: r.confidence,
        })
    }
}
