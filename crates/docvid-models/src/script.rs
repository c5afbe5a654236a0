//! Script and scene types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum scenes per script.
pub const MIN_SCENES: usize = 3;
/// Maximum scenes per script.
pub const MAX_SCENES: usize = 7;

/// Narration length bounds (characters).
pub const NARRATION_MIN_CHARS: usize = 10;
pub const NARRATION_MAX_CHARS: usize = 1000;

/// Visual prompt length bounds (characters).
pub const PROMPT_MIN_CHARS: usize = 5;
pub const PROMPT_MAX_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script has {0} scenes (expected {MIN_SCENES}-{MAX_SCENES})")]
    SceneCount(usize),

    #[error("Scene {scene_id}: narration is {len} chars (expected {NARRATION_MIN_CHARS}-{NARRATION_MAX_CHARS})")]
    NarrationLength { scene_id: u32, len: usize },

    #[error("Scene {scene_id}: visual prompt is {len} chars (expected {PROMPT_MIN_CHARS}-{PROMPT_MAX_CHARS})")]
    PromptLength { scene_id: u32, len: usize },

    #[error("Scene ids are not unique within the script")]
    DuplicateSceneId,
}

/// Kind of visual rendered for a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualType {
    Slide,
    Diagram,
    Graph,
    Formula,
    Code,
}

impl VisualType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualType::Slide => "slide",
            VisualType::Diagram => "diagram",
            VisualType::Graph => "graph",
            VisualType::Formula => "formula",
            VisualType::Code => "code",
        }
    }

    /// Normalize a provider-vocabulary label into a visual type.
    ///
    /// LLM output uses a wider vocabulary than the renderer set; common
    /// variants are mapped onto the type that handles them. Returns `None`
    /// for labels with no sensible mapping.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "slide" | "slides" | "presentation" | "image" | "picture" | "animation" => {
                Some(VisualType::Slide)
            }
            "diagram" | "flowchart" | "mindmap" => Some(VisualType::Diagram),
            "graph" | "chart" | "plot" => Some(VisualType::Graph),
            "formula" | "equation" | "math" => Some(VisualType::Formula),
            "code" | "programming" | "algorithm" => Some(VisualType::Code),
            _ => None,
        }
    }
}

impl std::fmt::Display for VisualType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-scene processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One atomic unit of the video: a narration paired with one visual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// Identifier unique within the script
    pub id: u32,
    /// Narration text (10-1000 chars)
    pub narration_text: String,
    /// Kind of visual to render
    pub visual_type: VisualType,
    /// Prompt for the visual renderer (5-500 chars)
    pub visual_prompt: String,
}

impl Scene {
    pub fn new(
        id: u32,
        narration_text: impl Into<String>,
        visual_type: VisualType,
        visual_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            narration_text: narration_text.into(),
            visual_type,
            visual_prompt: visual_prompt.into(),
        }
    }

    /// Check the per-scene character bounds.
    ///
    /// A violated bound is a scene-level failure, not a job failure.
    pub fn validate(&self) -> Result<(), ScriptError> {
        let narration_len = self.narration_text.chars().count();
        if !(NARRATION_MIN_CHARS..=NARRATION_MAX_CHARS).contains(&narration_len) {
            return Err(ScriptError::NarrationLength {
                scene_id: self.id,
                len: narration_len,
            });
        }

        let prompt_len = self.visual_prompt.chars().count();
        if !(PROMPT_MIN_CHARS..=PROMPT_MAX_CHARS).contains(&prompt_len) {
            return Err(ScriptError::PromptLength {
                scene_id: self.id,
                len: prompt_len,
            });
        }

        Ok(())
    }
}

/// Ordered list of scenes produced from the source document.
///
/// Created exactly once per job by the script phase; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub scenes: Vec<Scene>,
    /// Optional BCP-47 language code of the narration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Script {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes,
            language: None,
        }
    }

    /// Validate the scene-count bound and scene id uniqueness.
    ///
    /// Per-scene character bounds are checked at asset time so that one bad
    /// scene fails alone instead of rejecting the whole script.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if !(MIN_SCENES..=MAX_SCENES).contains(&self.scenes.len()) {
            return Err(ScriptError::SceneCount(self.scenes.len()));
        }

        let mut seen = std::collections::HashSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.id) {
                return Err(ScriptError::DuplicateSceneId);
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}
