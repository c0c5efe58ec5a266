//! # Stage Kinds and Results
//!
//! Every stage of every supported graph is named here, together with the shape
//! of the result its worker must return. Worker payloads are validated against
//! that shape before a stage counts as completed, so downstream stages never
//! read an untyped result bag.

use super::JsonMap;
use crate::error::{OrchestratorError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ScriptGeneration,
    ScenePlanning,
    VisualGeneration,
    VoiceGeneration,
    VideoAssembly,
    QualityReview,
    Finalize,
    ContentAnalysis,
    OptimizationSuggestions,
    ApplyOptimizations,
    ValidateResults,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScriptGeneration => "script_generation",
            Self::ScenePlanning => "scene_planning",
            Self::VisualGeneration => "visual_generation",
            Self::VoiceGeneration => "voice_generation",
            Self::VideoAssembly => "video_assembly",
            Self::QualityReview => "quality_review",
            Self::Finalize => "finalize",
            Self::ContentAnalysis => "content_analysis",
            Self::OptimizationSuggestions => "optimization_suggestions",
            Self::ApplyOptimizations => "apply_optimizations",
            Self::ValidateResults => "validate_results",
        }
    }

    /// Capability an agent must advertise to run this stage.
    /// `None` for stages the executor performs itself.
    pub fn capability(&self) -> Option<&'static str> {
        match self {
            Self::Finalize => None,
            other => Some(other.as_str()),
        }
    }

    /// Task type recorded for the stage's tasks
    pub fn task_type(&self) -> &'static str {
        self.as_str()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ScriptGeneration => "Script Generation",
            Self::ScenePlanning => "Scene Planning",
            Self::VisualGeneration => "Visual Generation",
            Self::VoiceGeneration => "Voice Generation",
            Self::VideoAssembly => "Video Assembly",
            Self::QualityReview => "Quality Review",
            Self::Finalize => "Finalize",
            Self::ContentAnalysis => "Content Analysis",
            Self::OptimizationSuggestions => "Optimization Suggestions",
            Self::ApplyOptimizations => "Apply Optimizations",
            Self::ValidateResults => "Validate Results",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let kind = match s {
            "script_generation" => Self::ScriptGeneration,
            "scene_planning" => Self::ScenePlanning,
            "visual_generation" => Self::VisualGeneration,
            "voice_generation" => Self::VoiceGeneration,
            "video_assembly" => Self::VideoAssembly,
            "quality_review" => Self::QualityReview,
            "finalize" => Self::Finalize,
            "content_analysis" => Self::ContentAnalysis,
            "optimization_suggestions" => Self::OptimizationSuggestions,
            "apply_optimizations" => Self::ApplyOptimizations,
            "validate_results" => Self::ValidateResults,
            _ => return Err(format!("Invalid stage: {s}")),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub script: String,
    #[serde(default)]
    pub outline: Vec<String>,
    #[serde(default)]
    pub word_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePlan {
    pub scenes: Vec<Value>,
    #[serde(default)]
    pub total_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAssets {
    /// Asset locations, one or more per scene
    pub assets: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceTrack {
    pub audio_uri: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledVideo {
    pub video_uri: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReview {
    pub score: f64,
    pub approved: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub metrics: JsonMap,
    #[serde(default)]
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestions {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOptimizations {
    pub applied: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    #[serde(default)]
    pub improvements: JsonMap,
}

/// Structured result of one stage, tagged by stage kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    Script(ScriptOutput),
    ScenePlan(ScenePlan),
    Visuals(VisualAssets),
    Voice(VoiceTrack),
    Assembly(AssembledVideo),
    Review(QualityReview),
    Analysis(ContentAnalysis),
    Suggestions(OptimizationSuggestions),
    Applied(AppliedOptimizations),
    Validation(ValidationReport),
}

impl StageResult {
    /// Validate a worker payload against the shape expected for `stage`
    pub fn from_payload(stage: StageKind, payload: Value) -> Result<Self> {
        match stage {
            StageKind::ScriptGeneration => parse(stage, payload).map(Self::Script),
            StageKind::ScenePlanning => parse(stage, payload).map(Self::ScenePlan),
            StageKind::VisualGeneration => parse(stage, payload).map(Self::Visuals),
            StageKind::VoiceGeneration => parse(stage, payload).map(Self::Voice),
            StageKind::VideoAssembly => parse(stage, payload).map(Self::Assembly),
            StageKind::QualityReview => parse(stage, payload).map(Self::Review),
            StageKind::ContentAnalysis => parse(stage, payload).map(Self::Analysis),
            StageKind::OptimizationSuggestions => parse(stage, payload).map(Self::Suggestions),
            StageKind::ApplyOptimizations => parse(stage, payload).map(Self::Applied),
            StageKind::ValidateResults => parse(stage, payload).map(Self::Validation),
            StageKind::Finalize => Err(OrchestratorError::StageFailed {
                stage: stage.to_string(),
                reason: "finalize does not accept worker results".to_string(),
            }),
        }
    }

    /// Stage that produces this kind of result
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Script(_) => StageKind::ScriptGeneration,
            Self::ScenePlan(_) => StageKind::ScenePlanning,
            Self::Visuals(_) => StageKind::VisualGeneration,
            Self::Voice(_) => StageKind::VoiceGeneration,
            Self::Assembly(_) => StageKind::VideoAssembly,
            Self::Review(_) => StageKind::QualityReview,
            Self::Analysis(_) => StageKind::ContentAnalysis,
            Self::Suggestions(_) => StageKind::OptimizationSuggestions,
            Self::Applied(_) => StageKind::ApplyOptimizations,
            Self::Validation(_) => StageKind::ValidateResults,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn parse<T: DeserializeOwned>(stage: StageKind, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| OrchestratorError::StageFailed {
        stage: stage.to_string(),
        reason: format!("unexpected result shape: {e}"),
    })
}
