//! Generation capabilities consumed by the pipeline.
//!
//! Defines the seams the coordinator calls through and the concrete
//! providers behind them:
//! - **[`DisabledGenerator`]**: fails every call; used when generation is not configured.
//! - **[`OpenAiGenerator`]**: calls an OpenAI-compatible chat-completions API
//!   with retry and backoff. Document synthesis exposes [`FileAccess`] to the
//!   model as a `read_file` function tool.
//!
//! # Provider Selection
//!
//! Use [`create_factory`] to build a [`GeneratorFactory`] from the
//! configuration. The factory is asked for a [`Generators`] pair once per
//! run so a warehouse's own `model` can override the configured one.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use repo_warehouse_core::catalogue::{Catalogue, CatalogueEntry};

use crate::config::GenerationConfig;

/// Path-scoped read access into a synchronized working copy.
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Read a file by repository-relative path. Paths leaving the working
    /// copy are refused.
    async fn read_file(&self, path: &str) -> Result<String>;
}

/// Turns README text and a file listing into a documentation outline.
#[async_trait]
pub trait CatalogueGenerator: Send + Sync {
    async fn structure(&self, readme: &str, file_tree: &str) -> Result<Catalogue>;
}

/// Writes the document for one catalogue node.
#[async_trait]
pub trait DocumentSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        entry: &CatalogueEntry<'_>,
        catalogue: &Catalogue,
        files: &dyn FileAccess,
    ) -> Result<String>;
}

/// The pair of capabilities one run uses.
#[derive(Clone)]
pub struct Generators {
    pub catalogue: Arc<dyn CatalogueGenerator>,
    pub synthesizer: Arc<dyn DocumentSynthesizer>,
}

/// Builds [`Generators`] for a run, honouring a per-warehouse model.
pub trait GeneratorFactory: Send + Sync {
    fn generators(&self, model: Option<&str>) -> Result<Generators>;
}

/// A fixed pair ignores the requested model.
impl GeneratorFactory for Generators {
    fn generators(&self, _model: Option<&str>) -> Result<Generators> {
        Ok(self.clone())
    }
}

// ============ Disabled Provider ============

/// Provider used when `[generation] provider = "disabled"`.
pub struct DisabledGenerator;

const DISABLED_MESSAGE: &str =
    "generation is disabled; set [generation] provider = \"openai\" and a model in the config";

#[async_trait]
impl CatalogueGenerator for DisabledGenerator {
    async fn structure(&self, _readme: &str, _file_tree: &str) -> Result<Catalogue> {
        bail!(DISABLED_MESSAGE)
    }
}

#[async_trait]
impl DocumentSynthesizer for DisabledGenerator {
    async fn synthesize(
        &self,
        _entry: &CatalogueEntry<'_>,
        _catalogue: &Catalogue,
        _files: &dyn FileAccess,
    ) -> Result<String> {
        bail!(DISABLED_MESSAGE)
    }
}

impl GeneratorFactory for DisabledGenerator {
    fn generators(&self, _model: Option<&str>) -> Result<Generators> {
        Ok(Generators {
            catalogue: Arc::new(DisabledGenerator),
            synthesizer: Arc::new(DisabledGenerator),
        })
    }
}

// ============ OpenAI-compatible Provider ============

const STRUCTURE_INSTRUCTIONS: &str = "You organise technical documentation for a source repository. \
Reply with a JSON object {\"items\": [{\"title\", \"name\", \"prompt\", \"children\"}]} wrapped in \
<documentation_structure></documentation_structure> tags. `title` is a short kebab-case identifier, \
`name` is the section heading, `prompt` says what the section must cover.";

const SYNTHESIS_INSTRUCTIONS: &str = "You write one section of technical documentation for a \
source repository in Markdown. Use the read_file tool to inspect files before describing them. \
Reply with the section body only.";

/// Chat-completions client for both generation capabilities.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
    max_tool_rounds: usize,
}

impl OpenAiGenerator {
    /// Create a client for `model`, or the configured model when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if no model is known or `OPENAI_API_KEY` is not set.
    pub fn new(config: &GenerationConfig, model: Option<&str>) -> Result<Self> {
        let model = model
            .map(str::to_string)
            .or_else(|| config.model.clone())
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key,
            model,
            max_retries: config.max_retries,
            max_tool_rounds: config.max_tool_rounds,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// One chat-completions call with retry/backoff. Returns `choices[0].message`.
    async fn complete(&self, messages: &[Value], tools: Option<&Value>) -> Result<Value> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(tools) = tools {
            body["tools"] = tools.clone();
        }

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return first_message(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::debug!(%status, attempt, "chat completion retryable error");
                        last_err = Some(anyhow!("chat API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("chat completion failed after retries")))
    }
}

fn first_message(json: &Value) -> Result<Value> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .cloned()
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message"))
}

fn message_text(message: &Value) -> String {
    message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Final answer of a synthesis call; a blank or missing body is an error.
fn document_text(message: &Value) -> Result<String> {
    let text = message_text(message);
    if text.trim().is_empty() {
        bail!("empty document");
    }
    Ok(text)
}

fn read_file_tool() -> Value {
    json!([{
        "type": "function",
        "function": {
            "name": "read_file",
            "description": "Read a file from the repository by its relative path.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Repository-relative path" }
                },
                "required": ["path"]
            }
        }
    }])
}

/// A requested `read_file` call: (tool call id, path).
fn tool_calls(message: &Value) -> Vec<(String, Option<String>)> {
    message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    let id = call
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let path = call
                        .pointer("/function/arguments")
                        .and_then(|a| a.as_str())
                        .and_then(|a| serde_json::from_str::<Value>(a).ok())
                        .and_then(|a| a.get("path").and_then(|p| p.as_str()).map(str::to_string));
                    (id, path)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl CatalogueGenerator for OpenAiGenerator {
    async fn structure(&self, readme: &str, file_tree: &str) -> Result<Catalogue> {
        let readme = if readme.trim().is_empty() {
            "(no README)"
        } else {
            readme
        };
        let messages = vec![
            json!({ "role": "system", "content": STRUCTURE_INSTRUCTIONS }),
            json!({
                "role": "user",
                "content": format!("<readme>\n{}\n</readme>\n<files>\n{}\n</files>", readme, file_tree),
            }),
        ];

        let reply = self.complete(&messages, None).await?;
        Ok(Catalogue::parse(&message_text(&reply))?)
    }
}

#[async_trait]
impl DocumentSynthesizer for OpenAiGenerator {
    async fn synthesize(
        &self,
        entry: &CatalogueEntry<'_>,
        catalogue: &Catalogue,
        files: &dyn FileAccess,
    ) -> Result<String> {
        let tools = read_file_tool();
        let mut messages = vec![
            json!({ "role": "system", "content": SYNTHESIS_INSTRUCTIONS }),
            json!({
                "role": "user",
                "content": format!(
                    "<catalogue>\n{}\n</catalogue>\nWrite the section '{}' ({}).\n{}",
                    catalogue.outline(),
                    entry.node.name,
                    entry.path,
                    entry.node.prompt
                ),
            }),
        ];

        for round in 0..self.max_tool_rounds {
            let reply = self.complete(&messages, Some(&tools)).await?;
            let calls = tool_calls(&reply);
            if calls.is_empty() {
                return document_text(&reply);
            }

            tracing::debug!(section = %entry.path, round, calls = calls.len(), "tool round");
            messages.push(reply);
            for (id, path) in calls {
                let content = match path {
                    Some(path) => match files.read_file(&path).await {
                        Ok(text) => text,
                        Err(e) => format!("error: {:#}", e),
                    },
                    None => "error: missing 'path' argument".to_string(),
                };
                messages.push(json!({ "role": "tool", "tool_call_id": id, "content": content }));
            }
        }

        // Out of rounds: ask for the answer without offering tools.
        let reply = self
            .complete(&messages, None)
            .await
            .context("final synthesis call failed")?;
        document_text(&reply)
    }
}

/// Factory building an [`OpenAiGenerator`] per run.
pub struct OpenAiFactory {
    config: GenerationConfig,
}

impl GeneratorFactory for OpenAiFactory {
    fn generators(&self, model: Option<&str>) -> Result<Generators> {
        let generator = Arc::new(OpenAiGenerator::new(&self.config, model)?);
        tracing::debug!(model = generator.model_name(), "generation provider ready");
        Ok(Generators {
            catalogue: generator.clone(),
            synthesizer: generator,
        })
    }
}

/// Create the [`GeneratorFactory`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`OpenAiGenerator`] |
pub fn create_factory(config: &GenerationConfig) -> Result<Arc<dyn GeneratorFactory>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiFactory {
            config: config.clone(),
        })),
        other => bail!("Unknown generation provider: {}", other),
    }
}
