//! # Stage Graphs
//!
//! Each workflow type maps to a fixed directed graph of stages whose edges mean
//! "must complete before". [`StageGraph::levels`] groups the stages into
//! layers: every stage in a layer has all of its prerequisites in earlier
//! layers, so the members of one layer can run concurrently.
//!
//! ```text
//! production:
//!   script_generation -> scene_planning -> { visual_generation, voice_generation }
//!     -> video_assembly -> quality_review -> finalize
//!
//! content optimization:
//!   content_analysis -> optimization_suggestions -> apply_optimizations -> validate_results
//! ```

use crate::error::{OrchestratorError, Result};
use crate::models::{StageKind, WorkflowType};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    pub kind: StageKind,
    pub prerequisites: Vec<StageKind>,
}

impl StageNode {
    pub fn new(kind: StageKind, prerequisites: &[StageKind]) -> Self {
        Self {
            kind,
            prerequisites: prerequisites.to_vec(),
        }
    }

    /// Capability an agent needs to run this stage
    pub fn capability(&self) -> Option<&'static str> {
        self.kind.capability()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    workflow_type: WorkflowType,
    nodes: Vec<StageNode>,
}

impl StageGraph {
    pub fn new(workflow_type: WorkflowType, nodes: Vec<StageNode>) -> Self {
        Self {
            workflow_type,
            nodes,
        }
    }

    pub fn production() -> Self {
        use crate::models::StageKind::*;
        Self::new(
            WorkflowType::Production,
            vec![
                StageNode::new(ScriptGeneration, &[]),
                StageNode::new(ScenePlanning, &[ScriptGeneration]),
                StageNode::new(VisualGeneration, &[ScenePlanning]),
                StageNode::new(VoiceGeneration, &[ScenePlanning]),
                StageNode::new(VideoAssembly, &[VisualGeneration, VoiceGeneration]),
                StageNode::new(QualityReview, &[VideoAssembly]),
                StageNode::new(Finalize, &[QualityReview]),
            ],
        )
    }

    pub fn optimization() -> Self {
        use crate::models::StageKind::*;
        Self::new(
            WorkflowType::ContentOptimization,
            vec![
                StageNode::new(ContentAnalysis, &[]),
                StageNode::new(OptimizationSuggestions, &[ContentAnalysis]),
                StageNode::new(ApplyOptimizations, &[OptimizationSuggestions]),
                StageNode::new(ValidateResults, &[ApplyOptimizations]),
            ],
        )
    }

    pub fn for_type(workflow_type: WorkflowType) -> Self {
        match workflow_type {
            WorkflowType::Production => Self::production(),
            WorkflowType::ContentOptimization => Self::optimization(),
        }
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn node(&self, kind: StageKind) -> Option<&StageNode> {
        self.nodes.iter().find(|n| n.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reject duplicate stages, unknown prerequisites and cycles
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.kind) {
                return Err(OrchestratorError::Configuration(format!(
                    "stage {} appears twice in the {} graph",
                    node.kind, self.workflow_type
                )));
            }
        }
        for node in &self.nodes {
            if let Some(missing) = node.prerequisites.iter().find(|p| !seen.contains(*p)) {
                return Err(OrchestratorError::Configuration(format!(
                    "stage {} depends on unknown stage {missing}",
                    node.kind
                )));
            }
        }
        self.levels().map(|_| ())
    }

    /// Stages grouped into concurrently runnable layers, in dependency order
    pub fn levels(&self) -> Result<Vec<Vec<StageKind>>> {
        let mut placed: BTreeSet<StageKind> = BTreeSet::new();
        let mut levels = Vec::new();

        while placed.len() < self.nodes.len() {
            // Preserve declaration order within a level
            let level: Vec<StageKind> = self
                .nodes
                .iter()
                .filter(|n| !placed.contains(&n.kind))
                .filter(|n| n.prerequisites.iter().all(|p| placed.contains(p)))
                .map(|n| n.kind)
                .collect();

            if level.is_empty() {
                return Err(OrchestratorError::Configuration(format!(
                    "{} graph has a cycle or an unknown prerequisite",
                    self.workflow_type
                )));
            }
            placed.extend(level.iter().copied());
            levels.push(level);
        }

        Ok(levels)
    }
}
