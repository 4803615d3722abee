//! Data models for folio-ingest
//!
//! - Narrative unit lifecycle state machine
//! - Manuscript input and segmented sections
//! - Project record and derived progress
//! - Worker message and callback payloads

pub mod messages;
pub mod project;
pub mod section;
pub mod unit;

pub use messages::{
    AnalysisContext, AnalysisResult, CallbackStatus, CharacterMention, CompletionCallback,
    GlobalMergeMessage, PlotEvent, StatusUpdateCallback, UnitAnalysisMessage, WorkMessage,
    UNIT_ANALYSIS_PASS,
};
pub use project::{
    Project, ProjectProgress, PublishReport, StatusCounts, UnitDispatchFailure,
};
pub use section::{Manuscript, Section};
pub use unit::{
    LifecycleState, NarrativeUnit, StateTransition, UnitKind, UnitStatus, UnitVersion,
};
