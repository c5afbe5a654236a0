//! Visual renderer clients.
//!
//! One renderer per visual type, all with the same shape after wrapping:
//! structured prompt in, persisted image out. Slides go to the external
//! presentation service; diagrams, charts, formulas, and code go to the
//! visual renderer service. When rendering fails for good, a locally
//! generated SVG placeholder stands in so composition can still proceed.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use docvid_models::{ImageFormat, VisualAsset, VisualType};

use crate::error::{ServiceError, ServiceResult};
use crate::fingerprint::content_fingerprint;

/// Bumped whenever rendering parameters change shape.
pub const RENDER_PARAMS_VERSION: &str = "v2";

#[derive(Debug, Clone)]
pub struct VisualConfig {
    /// Presentation (slide) service base URL
    pub slide_base_url: String,
    /// Renderer service base URL for diagram/graph/formula/code
    pub renderer_base_url: String,
    pub output_dir: PathBuf,
    pub timeout: Duration,
    /// Declared output dimensions
    pub width: u32,
    pub height: u32,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            slide_base_url: "http://localhost:5000".to_string(),
            renderer_base_url: "http://localhost:5100".to_string(),
            output_dir: PathBuf::from("assets/visuals"),
            timeout: Duration::from_secs(60),
            width: 1280,
            height: 720,
        }
    }
}

/// Chart family inferred from the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

impl ChartKind {
    /// Infer the chart kind from prompt keywords; bar is the default.
    pub fn infer(prompt: &str) -> Self {
        let lower = prompt.to_ascii_lowercase();
        if lower.contains("pie") || lower.contains("proportion") || lower.contains("share") {
            ChartKind::Pie
        } else if lower.contains("line")
            || lower.contains("trend")
            || lower.contains("over time")
            || lower.contains("timeline")
        {
            ChartKind::Line
        } else {
            ChartKind::Bar
        }
    }
}

/// Structured graph description parsed from a diagram prompt.
#[derive(Debug, Clone, Serialize)]
pub struct DiagramSpec {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
    /// Remaining prose the renderer may use for labels/styling
    pub description: String,
}

impl DiagramSpec {
    /// Parse `A -> B` style lines into nodes and edges. Prompts without any
    /// arrows become a single-node description the renderer lays out freely.
    pub fn parse(prompt: &str) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let push_node = |name: &str, nodes: &mut Vec<String>| {
            let name = name.trim().trim_end_matches(['.', ',', ';']).to_string();
            if !name.is_empty() && !nodes.contains(&name) {
                nodes.push(name.clone());
            }
            name
        };

        for line in prompt.lines() {
            for segment in line.split(['\n', ';']) {
                if !segment.contains("->") {
                    continue;
                }
                let parts: Vec<&str> = segment.split("->").collect();
                for pair in parts.windows(2) {
                    let from = push_node(pair[0], &mut nodes);
                    let to = push_node(pair[1], &mut nodes);
                    if !from.is_empty() && !to.is_empty() {
                        edges.push((from, to));
                    }
                }
            }
        }

        Self {
            nodes,
            edges,
            description: prompt.to_string(),
        }
    }
}

#[derive(Serialize)]
struct SlideRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct DiagramRequest<'a> {
    #[serde(flatten)]
    spec: &'a DiagramSpec,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct ChartRequest<'a> {
    kind: ChartKind,
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct FormulaRequest<'a> {
    latex: &'a str,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct CodeRequest<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    width: u32,
    height: u32,
}

/// Client over the visual rendering services.
pub struct VisualClient {
    http: reqwest::Client,
    config: VisualConfig,
}

impl VisualClient {
    pub fn new(config: VisualConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Cache key for a rendering: type + prompt + render params.
    pub fn fingerprint(&self, visual_type: VisualType, prompt: &str) -> String {
        content_fingerprint(&[
            visual_type.as_str(),
            prompt,
            &self.config.width.to_string(),
            &self.config.height.to_string(),
            RENDER_PARAMS_VERSION,
        ])
    }

    /// Render the visual for a scene. Dispatches on the visual type.
    pub async fn render(
        &self,
        scene_id: u32,
        visual_type: VisualType,
        prompt: &str,
    ) -> ServiceResult<VisualAsset> {
        debug!(scene_id, visual_type = %visual_type, "Rendering visual");

        let (url, body) = self.build_request(visual_type, prompt)?;
        let response = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                service: format!("visual:{}", visual_type),
                status: status.as_u16(),
            });
        }

        let format = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .and_then(ImageFormat::from_content_type)
            .unwrap_or(ImageFormat::Png);

        let payload = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        if payload.is_empty() {
            return Err(ServiceError::invalid_response(format!(
                "{} renderer returned empty payload",
                visual_type
            )));
        }

        let path = self
            .write_asset(scene_id, format.extension(), &payload)
            .await?;

        info!(
            scene_id,
            visual_type = %visual_type,
            path = %path.display(),
            bytes = payload.len(),
            "Rendered visual asset"
        );

        Ok(VisualAsset {
            scene_id,
            path,
            width: self.config.width,
            height: self.config.height,
            format,
            fingerprint: self.fingerprint(visual_type, prompt),
        })
    }

    fn build_request(
        &self,
        visual_type: VisualType,
        prompt: &str,
    ) -> ServiceResult<(String, String)> {
        let w = self.config.width;
        let h = self.config.height;

        let (url, body) = match visual_type {
            VisualType::Slide => (
                format!("{}/v1/slides", self.config.slide_base_url),
                serde_json::to_string(&SlideRequest {
                    prompt,
                    width: w,
                    height: h,
                }),
            ),
            VisualType::Diagram => {
                let spec = DiagramSpec::parse(prompt);
                (
                    format!("{}/render/diagram", self.config.renderer_base_url),
                    serde_json::to_string(&DiagramRequest {
                        spec: &spec,
                        width: w,
                        height: h,
                    }),
                )
            }
            VisualType::Graph => (
                format!("{}/render/chart", self.config.renderer_base_url),
                serde_json::to_string(&ChartRequest {
                    kind: ChartKind::infer(prompt),
                    prompt,
                    width: w,
                    height: h,
                }),
            ),
            VisualType::Formula => (
                format!("{}/render/formula", self.config.renderer_base_url),
                serde_json::to_string(&FormulaRequest {
                    latex: prompt,
                    width: w,
                    height: h,
                }),
            ),
            VisualType::Code => (
                format!("{}/render/code", self.config.renderer_base_url),
                serde_json::to_string(&CodeRequest {
                    source: prompt,
                    language: infer_code_language(prompt),
                    width: w,
                    height: h,
                }),
            ),
        };

        let body =
            body.map_err(|e| ServiceError::invalid_response(format!("Request encoding: {}", e)))?;
        Ok((url, body))
    }

    async fn write_asset(&self, scene_id: u32, ext: &str, payload: &[u8]) -> ServiceResult<PathBuf> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = self
            .config
            .output_dir
            .join(format!("{}_{}.{}", scene_id, Uuid::new_v4(), ext));
        tokio::fs::write(&path, payload).await?;
        Ok(path)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout {
                service: "visual".to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else {
            ServiceError::Http(e)
        }
    }

    /// Write a local SVG placeholder for a scene whose rendering failed.
    ///
    /// Placeholders are produced without touching any external service, so
    /// they work even when every renderer is down.
    pub async fn error_placeholder(
        &self,
        scene_id: u32,
        visual_type: VisualType,
        error: &str,
    ) -> ServiceResult<VisualAsset> {
        warn!(scene_id, visual_type = %visual_type, error, "Writing error placeholder");

        let truncated: String = error.chars().take(80).collect();
        let svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
  <rect width="{w}" height="{h}" fill="#ffebee"/>
  <rect x="8" y="8" width="{iw}" height="{ih}" fill="none" stroke="#f44336" stroke-width="4" stroke-dasharray="12,8"/>
  <text x="50%" y="40%" text-anchor="middle" font-family="sans-serif" font-size="40" fill="#c62828">Scene {scene_id}: visual generation failed</text>
  <text x="50%" y="52%" text-anchor="middle" font-family="sans-serif" font-size="28" fill="#424242">Type: {visual_type}</text>
  <text x="50%" y="62%" text-anchor="middle" font-family="sans-serif" font-size="20" fill="#424242">{error_text}</text>
</svg>
"##,
            w = self.config.width,
            h = self.config.height,
            iw = self.config.width - 16,
            ih = self.config.height - 16,
            scene_id = scene_id,
            visual_type = visual_type,
            error_text = escape_xml(&truncated),
        );

        let path = self
            .write_asset(scene_id, ImageFormat::Svg.extension(), svg.as_bytes())
            .await?;

        Ok(VisualAsset {
            scene_id,
            path,
            width: self.config.width,
            height: self.config.height,
            format: ImageFormat::Svg,
            fingerprint: String::new(),
        })
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Best-effort language detection for code prompts.
fn infer_code_language(prompt: &str) -> Option<&'static str> {
    let lower = prompt.to_ascii_lowercase();

    for (marker, language) in [
        ("```python", "python"),
        ("```rust", "rust"),
        ("```javascript", "javascript"),
        ("```js", "javascript"),
        ("```typescript", "typescript"),
        ("```go", "go"),
        ("```java", "java"),
        ("```c++", "cpp"),
        ("```sql", "sql"),
    ] {
        if lower.contains(marker) {
            return Some(language);
        }
    }

    for (keyword, language) in [
        ("def ", "python"),
        ("import numpy", "python"),
        ("fn main", "rust"),
        ("let mut", "rust"),
        ("function ", "javascript"),
        ("const ", "javascript"),
        ("public static void", "java"),
        ("select ", "sql"),
    ] {
        if lower.contains(keyword) {
            return Some(language);
        }
    }

    None
}
