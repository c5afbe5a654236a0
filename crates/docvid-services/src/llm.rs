//! LLM script generation client.
//!
//! Talks to an OpenAI-compatible chat endpoint and turns a source document
//! into a 3-7 scene script. The response parser is deliberately tolerant:
//! models wrap JSON in fences, prose, or envelopes, and all of those shapes
//! are accepted. When the model cannot be reached or keeps producing
//! unusable output, `fallback_script` generates a deterministic slide-only
//! script so the job can still proceed.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use docvid_models::{Scene, Script, VisualType, MAX_SCENES, MIN_SCENES};

use crate::error::{ServiceError, ServiceResult};
use crate::fingerprint::content_fingerprint;

/// Bumped whenever the prompt contract changes, so cached scripts from an
/// older prompt are not reused.
pub const SCRIPT_TEMPLATE_VERSION: &str = "v3";

/// Maximum source characters sent to the model.
const MAX_SOURCE_CHARS: usize = 8000;

const SYSTEM_PROMPT: &str = "You are an expert video script writer. Analyze the provided document \
and produce a short educational video script. Respond ONLY with JSON of the form \
{\"scenes\": [{\"id\": 1, \"narration_text\": \"...\", \"visual_type\": \"slide\", \
\"visual_prompt\": \"...\"}]}. Produce between 3 and 7 scenes. visual_type must be one of: \
slide, diagram, graph, formula, code. Each narration_text is 10-1000 characters of spoken \
narration; each visual_prompt is 5-500 characters describing the visual in detail.";

#[derive(Clone)]
pub struct LlmConfig {
    /// Chat completions endpoint (e.g. `https://host/v1/chat/completions`)
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "default".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for the external LLM service.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Cache key for a script: normalized source text + model + template.
    pub fn script_fingerprint(&self, source_text: &str) -> String {
        let normalized = normalize_source(source_text);
        content_fingerprint(&[&normalized, &self.config.model, SCRIPT_TEMPLATE_VERSION])
    }

    /// Generate a script from the source text.
    ///
    /// Malformed output gets exactly one regeneration attempt before the
    /// error is surfaced; transport-level retries belong to the caller's
    /// retry wrapper.
    pub async fn generate_script(&self, source_text: &str, filename: &str) -> ServiceResult<Script> {
        let content = self.request_completion(source_text, filename).await?;

        match parse_script_response(&content) {
            Ok(script) => Ok(script),
            Err(first_err) => {
                warn!(
                    error = %first_err,
                    "Malformed script output, requesting one regeneration"
                );
                let content = self.request_completion(source_text, filename).await?;
                parse_script_response(&content)
            }
        }
    }

    async fn request_completion(&self, source_text: &str, filename: &str) -> ServiceResult<String> {
        let truncated: String = source_text.chars().take(MAX_SOURCE_CHARS).collect();
        let user_prompt = format!(
            "Content from file '{}':\n\n{}\n\nCreate the video script now.",
            filename, truncated
        );

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: 0.3,
        };

        debug!(model = %self.config.model, source_chars = truncated.len(), "Calling LLM");

        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error("llm", self.config.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                service: "llm".to_string(),
                status: status.as_u16(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ServiceError::invalid_response("LLM returned empty content"));
        }

        Ok(content)
    }

    /// Minimal round-trip probe for health reporting.
    pub async fn health_check(&self) -> bool {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: "Reply with OK.",
            }],
            temperature: 0.0,
        };

        let result = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(10))
            .json(&request)
            .send()
            .await;

        matches!(result, Ok(resp) if resp.status().is_success())
    }
}

fn map_transport_error(service: &str, timeout: Duration, e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout {
            service: service.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        ServiceError::Http(e)
    }
}

/// Collapse whitespace so incidental formatting differences do not defeat
/// the script cache.
fn normalize_source(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Recover the JSON block from whatever envelope the model produced.
fn extract_json_block(response: &str) -> Option<String> {
    // ```json fenced block
    let fenced = Regex::new(r"(?si)```json\s*(.*)\s*```").unwrap();
    if let Some(caps) = fenced.captures(response) {
        return Some(caps[1].trim().to_string());
    }

    // Any fenced block that looks like JSON
    let any_fence = Regex::new(r"(?s)```\s*(.*)\s*```").unwrap();
    if let Some(caps) = any_fence.captures(response) {
        let candidate = caps[1].trim();
        if candidate.starts_with('[') || candidate.starts_with('{') {
            return Some(candidate.to_string());
        }
    }

    // Raw JSON array embedded in prose
    let raw_array = Regex::new(r"(?s)\[\s*\{.*\}\s*\]").unwrap();
    if let Some(m) = raw_array.find(response) {
        return Some(m.as_str().to_string());
    }

    // The whole body, if it already looks like JSON
    let trimmed = response.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return Some(trimmed.to_string());
    }

    None
}

/// Parse and validate the model's script output.
///
/// Accepts a bare scene array or a `{scenes: [...]}` / `{script: [...]}`
/// envelope. Scenes missing narration or prompt are dropped; unknown visual
/// labels fall back to slide. More than the maximum scene count is repaired
/// by truncation; fewer than the minimum is an error the caller handles by
/// falling back.
pub fn parse_script_response(response: &str) -> ServiceResult<Script> {
    let json_block = extract_json_block(response)
        .ok_or_else(|| ServiceError::invalid_response("No JSON found in LLM response"))?;

    let value: Value = serde_json::from_str(&json_block)
        .map_err(|e| ServiceError::invalid_response(format!("Invalid JSON: {}", e)))?;

    let raw_scenes = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let inner = map
                .remove("scenes")
                .or_else(|| map.remove("script"))
                .ok_or_else(|| {
                    ServiceError::invalid_response("JSON object has no scenes field")
                })?;
            match inner {
                Value::Array(items) => items,
                other => vec![other],
            }
        }
        other => {
            return Err(ServiceError::invalid_response(format!(
                "Unexpected JSON shape: {}",
                other
            )))
        }
    };

    let mut scenes = Vec::new();
    for (index, raw) in raw_scenes.iter().enumerate() {
        let narration = raw
            .get("narration_text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        let prompt = raw
            .get("visual_prompt")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();

        if narration.is_empty() || prompt.is_empty() {
            warn!(scene_index = index, "Dropping scene with missing fields");
            continue;
        }

        let id = raw
            .get("id")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(index as u32 + 1);

        let visual_type = raw
            .get("visual_type")
            .and_then(Value::as_str)
            .and_then(VisualType::from_label)
            .unwrap_or(VisualType::Slide);

        scenes.push(Scene::new(id, narration, visual_type, prompt));
    }

    if scenes.len() > MAX_SCENES {
        info!(
            produced = scenes.len(),
            kept = MAX_SCENES,
            "Truncating oversized script"
        );
        scenes.truncate(MAX_SCENES);
    }

    if scenes.len() < MIN_SCENES {
        return Err(ServiceError::invalid_response(format!(
            "Only {} valid scene(s) in LLM response",
            scenes.len()
        )));
    }

    // Re-number on collision so ids stay unique within the script
    let mut seen = std::collections::HashSet::new();
    let mut next_id = scenes.iter().map(|s| s.id).max().unwrap_or(0);
    for scene in &mut scenes {
        if !seen.insert(scene.id) {
            next_id += 1;
            scene.id = next_id;
            seen.insert(scene.id);
        }
    }

    Ok(Script::new(scenes))
}

/// Deterministic fallback used when the LLM is unavailable or keeps
/// producing unusable output: split the source into 3-7 slide scenes.
pub fn fallback_script(source_text: &str) -> Script {
    warn!("Generating deterministic fallback script");

    let words: Vec<&str> = source_text.split_whitespace().collect();
    let scene_count = (words.len() / 50).clamp(MIN_SCENES, MAX_SCENES);

    let chunk_size = words.len().div_ceil(scene_count).max(1);
    let mut scenes = Vec::with_capacity(scene_count);

    for i in 0..scene_count {
        let chunk = words
            .iter()
            .skip(i * chunk_size)
            .take(chunk_size)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        let narration = build_fallback_narration(i, scene_count, &chunk);
        let prompt = build_fallback_prompt(i, scene_count, &chunk);

        scenes.push(Scene::new(i as u32 + 1, narration, VisualType::Slide, prompt));
    }

    Script::new(scenes)
}

fn build_fallback_narration(index: usize, total: usize, chunk: &str) -> String {
    let body: String = chunk.chars().take(900).collect();
    let narration = if index == 0 {
        format!("Welcome to this overview. {}", body)
    } else if index == total - 1 {
        format!("To wrap up: {}", body)
    } else {
        body
    };

    if narration.chars().count() < 10 {
        "This section covers the key points of the document.".to_string()
    } else {
        narration
    }
}

fn build_fallback_prompt(index: usize, total: usize, chunk: &str) -> String {
    let summary: String = chunk.chars().take(400).collect();
    let prompt = if index == 0 {
        format!("Title slide introducing: {}", summary)
    } else if index == total - 1 {
        format!("Summary slide of key takeaways: {}", summary)
    } else {
        format!("Content slide covering: {}", summary)
    };

    if prompt.chars().count() < 5 {
        "Simple text slide".to_string()
    } else {
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_SCENES: &str = r#"[
        {"id": 1, "narration_text": "First scene narration here.", "visual_type": "slide", "visual_prompt": "Title slide"},
        {"id": 2, "narration_text": "Second scene narration here.", "visual_type": "chart", "visual_prompt": "Bar chart of results"},
        {"id": 3, "narration_text": "Third scene narration here.", "visual_type": "code", "visual_prompt": "Python example"}
    ]"#;

    #[test]
    fn test_parse_fenced_json() {
        let response = format!("Here is your script:\n```json\n{}\n```\nEnjoy!", VALID_SCENES);
        let script = parse_script_response(&response).unwrap();
        assert_eq!(script.len(), 3);
        assert_eq!(script.scenes[1].visual_type, VisualType::Graph);
    }

    #[test]
    fn test_parse_generic_fence() {
        let response = format!("```\n{}\n```", VALID_SCENES);
        let script = parse_script_response(&response).unwrap();
        assert_eq!(script.len(), 3);
    }

    #[test]
    fn test_parse_raw_array_in_prose() {
        let response = format!("Sure thing! {} Hope that helps.", VALID_SCENES);
        let script = parse_script_response(&response).unwrap();
        assert_eq!(script.len(), 3);
    }

    #[test]
    fn test_parse_scenes_envelope() {
        let response = format!(r#"{{"scenes": {}}}"#, VALID_SCENES);
        let script = parse_script_response(&response).unwrap();
        assert_eq!(script.len(), 3);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let result = parse_script_response("I cannot produce a script for this document.");
        assert!(matches!(result, Err(ServiceError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_rejects_too_few_scenes() {
        let response = r#"[
            {"id": 1, "narration_text": "Only one scene here sadly.", "visual_type": "slide", "visual_prompt": "A slide"}
        ]"#;
        assert!(matches!(
            parse_script_response(response),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_truncates_oversized_script() {
        let scenes: Vec<String> = (1..=10)
            .map(|i| {
                format!(
                    r#"{{"id": {i}, "narration_text": "Scene number {i} narration.", "visual_type": "slide", "visual_prompt": "Slide {i}"}}"#
                )
            })
            .collect();
        let response = format!("[{}]", scenes.join(","));

        let script = parse_script_response(&response).unwrap();
        assert_eq!(script.len(), MAX_SCENES);
        assert_eq!(script.scenes[0].id, 1);
    }

    #[test]
    fn test_parse_drops_incomplete_scenes_and_normalizes_types() {
        let response = r#"[
            {"id": 1, "narration_text": "Good scene narration text.", "visual_type": "flowchart", "visual_prompt": "A -> B"},
            {"id": 2, "narration_text": "", "visual_type": "slide", "visual_prompt": "Empty narration"},
            {"id": 3, "narration_text": "Another valid one right here.", "visual_type": "hologram", "visual_prompt": "Unknown type"},
            {"id": 4, "narration_text": "Final valid scene narration.", "visual_type": "equation", "visual_prompt": "E = mc^2"}
        ]"#;

        let script = parse_script_response(response).unwrap();
        assert_eq!(script.len(), 3);
        assert_eq!(script.scenes[0].visual_type, VisualType::Diagram);
        assert_eq!(script.scenes[1].visual_type, VisualType::Slide);
        assert_eq!(script.scenes[2].visual_type, VisualType::Formula);
    }

    #[test]
    fn test_parse_renumbers_duplicate_ids() {
        let response = r#"[
            {"id": 1, "narration_text": "First narration goes here.", "visual_type": "slide", "visual_prompt": "One"},
            {"id": 1, "narration_text": "Second narration goes here.", "visual_type": "slide", "visual_prompt": "Two"},
            {"id": 2, "narration_text": "Third narration goes here.", "visual_type": "slide", "visual_prompt": "Three"}
        ]"#;

        let script = parse_script_response(response).unwrap();
        script.validate().unwrap();
    }

    #[test]
    fn test_fallback_scene_count_clamps() {
        let tiny = fallback_script("just a few words");
        assert_eq!(tiny.len(), MIN_SCENES);
        tiny.validate().unwrap();

        let large_text = "word ".repeat(5000);
        let large = fallback_script(&large_text);
        assert_eq!(large.len(), MAX_SCENES);
        large.validate().unwrap();
    }

    #[test]
    fn test_fallback_scenes_pass_scene_validation() {
        let text = "Rust is a systems programming language focused on safety and speed. \
                    It achieves memory safety without garbage collection. "
            .repeat(20);
        let script = fallback_script(&text);
        for scene in &script.scenes {
            scene.validate().unwrap();
            assert_eq!(scene.visual_type, VisualType::Slide);
        }
    }

    #[test]
    fn test_normalize_source_collapses_whitespace() {
        assert_eq!(
            normalize_source("  a\n\nb\t c  "),
            normalize_source("a b c")
        );
    }

    #[test]
    fn test_script_fingerprint_varies_by_model() {
        let a = LlmClient::new(LlmConfig {
            model: "model-a".into(),
            ..Default::default()
        })
        .unwrap();
        let b = LlmClient::new(LlmConfig {
            model: "model-b".into(),
            ..Default::default()
        })
        .unwrap();

        assert_ne!(a.script_fingerprint("text"), b.script_fingerprint("text"));
        assert_eq!(a.script_fingerprint("a  b"), a.script_fingerprint("a b"));
    }
}
