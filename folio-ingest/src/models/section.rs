//! Manuscript input and segmentation output

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw manuscript text, consumed once by segmentation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manuscript {
    pub text: String,
    /// Parent group the resulting units attach to
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

impl Manuscript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// One titled section produced by segmentation
///
/// Ordinals start at 1 and increase by one; bodies are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: String,
    pub body: String,
    pub ordinal: u32,
}

impl Section {
    /// Title used when no header was detected
    pub fn placeholder_title(ordinal: u32) -> String {
        format!("Section {}", ordinal)
    }
}
