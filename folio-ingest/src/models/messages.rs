//! Worker-facing message and callback types
//!
//! Outbound messages are tagged by `messageType`. Inbound analysis results are
//! a tagged enum validated with [`AnalysisResult::validate`] before they reach
//! the lifecycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnitStatus;

/// Pass number of per-unit analysis
pub const UNIT_ANALYSIS_PASS: u8 = 1;

/// Outbound work message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum WorkMessage {
    #[serde(rename = "UNIT_ANALYSIS")]
    UnitAnalysis(UnitAnalysisMessage),
    #[serde(rename = "GLOBAL_MERGE")]
    GlobalMerge(GlobalMergeMessage),
}

impl WorkMessage {
    pub fn trace_id(&self) -> &str {
        match self {
            WorkMessage::UnitAnalysis(msg) => &msg.trace_id,
            WorkMessage::GlobalMerge(msg) => &msg.trace_id,
        }
    }

    pub fn project_id(&self) -> Uuid {
        match self {
            WorkMessage::UnitAnalysis(msg) => msg.project_id,
            WorkMessage::GlobalMerge(msg) => msg.project_id,
        }
    }
}

/// First-pass analysis request for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitAnalysisMessage {
    pub unit_id: Uuid,
    pub project_id: Uuid,
    pub parent_group_id: Option<Uuid>,
    pub ordinal: u32,
    pub title: String,
    pub content: String,
    pub total_units_in_group: u32,
    pub pass_number: u8,
    pub callback_address: String,
    pub context: AnalysisContext,
    pub trace_id: String,
}

/// Project knowledge handed to the worker with each unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    pub existing_entities: Vec<String>,
}

/// Second-pass, project-wide merge request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMergeMessage {
    pub project_id: Uuid,
    pub generation: u32,
    pub callback_address: String,
    pub trace_id: String,
}

/// Final status reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// Inbound completion callback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCallback {
    pub unit_id: Uuid,
    pub status: CallbackStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Inbound intermediate progress callback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateCallback {
    pub unit_id: Uuid,
    pub status: UnitStatus,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Character found in a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMention {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub mention_count: u32,
}

/// Plot event found in a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotEvent {
    pub summary: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Analysis payload, one variant per analysis kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisResult {
    Characters { characters: Vec<CharacterMention> },
    Events { events: Vec<PlotEvent> },
    Summary { text: String },
}

impl AnalysisResult {
    /// Reject payloads that are structurally valid JSON but carry no usable data
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AnalysisResult::Characters { characters } => {
                if let Some(position) = characters.iter().position(|c| c.name.trim().is_empty()) {
                    return Err(format!("character #{} has an empty name", position + 1));
                }
                Ok(())
            }
            AnalysisResult::Events { events } => {
                if let Some(position) = events.iter().position(|e| e.summary.trim().is_empty()) {
                    return Err(format!("event #{} has an empty summary", position + 1));
                }
                Ok(())
            }
            AnalysisResult::Summary { text } => {
                if text.trim().is_empty() {
                    return Err("summary text is empty".to_string());
                }
                Ok(())
            }
        }
    }

    /// Entity names worth feeding back into later dispatches
    pub fn entity_names(&self) -> Vec<String> {
        match self {
            AnalysisResult::Characters { characters } => characters
                .iter()
                .map(|c| c.name.trim().to_string())
                .collect(),
            _ => Vec::new(),
        }
    }
}
