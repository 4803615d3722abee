//! Project, group and manuscript intake
//!
//! Turns a manuscript into persisted CREATED units, one per segmented
//! section, appended after any units the project already has.

use std::sync::Arc;

use folio_common::Error;
use tracing::info;
use uuid::Uuid;

use super::manuscript_segmenter::segment;
use super::unit_lifecycle::UnitLifecycle;
use crate::error::LifecycleError;
use crate::models::{Manuscript, NarrativeUnit, Project, UnitKind};
use crate::types::{ProjectStore, UnitStore};

pub struct ManuscriptIngestor {
    units: Arc<dyn UnitStore>,
    projects: Arc<dyn ProjectStore>,
    lifecycle: Arc<UnitLifecycle>,
}

impl ManuscriptIngestor {
    pub fn new(
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        lifecycle: Arc<UnitLifecycle>,
    ) -> Self {
        Self {
            units,
            projects,
            lifecycle,
        }
    }

    pub async fn create_project(&self, title: &str) -> Result<Project, LifecycleError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("Project title must not be empty".to_string()).into());
        }

        let project = Project::new(title);
        self.projects.insert(&project).await?;
        info!(project_id = %project.id, title = %project.title, "Project created");
        Ok(project)
    }

    /// Create a parent grouping (part, volume) that units can attach to
    pub async fn create_group(&self, project_id: Uuid, title: &str) -> Result<NarrativeUnit, LifecycleError> {
        self.require_project(project_id).await?;

        let ordinal = self.units.max_ordinal(project_id).await? + 1;
        let group = NarrativeUnit::new_group(project_id, ordinal, title.trim());
        self.lifecycle.create(&group).await?;

        info!(project_id = %project_id, group_id = %group.id, title = %group.title, "Group created");
        Ok(group)
    }

    /// Segment a manuscript and persist one CREATED unit per section
    ///
    /// Units are numbered after the project's current highest ordinal. The
    /// project moves to a new generation once the units are stored.
    pub async fn ingest_manuscript(
        &self,
        project_id: Uuid,
        manuscript: Manuscript,
    ) -> Result<Vec<NarrativeUnit>, LifecycleError> {
        self.require_project(project_id).await?;

        if let Some(parent_id) = manuscript.parent_id {
            let parent = self.lifecycle.load(parent_id).await?;
            if parent.project_id != project_id || parent.kind != UnitKind::Group {
                return Err(Error::InvalidInput(format!(
                    "Unit {} is not a group of project {}",
                    parent_id, project_id
                ))
                .into());
            }
        }

        let sections = segment(&manuscript.text);
        if sections.is_empty() {
            info!(project_id = %project_id, "Manuscript produced no sections");
            return Ok(Vec::new());
        }

        let offset = self.units.max_ordinal(project_id).await?;
        let mut created = Vec::with_capacity(sections.len());
        for section in sections {
            let unit = NarrativeUnit::new_narrative(
                project_id,
                manuscript.parent_id,
                offset + section.ordinal,
                section.title,
                section.body,
            );
            self.lifecycle.create(&unit).await?;
            created.push(unit);
        }

        let generation = self.projects.advance_cohort(project_id).await?;
        info!(
            project_id = %project_id,
            units = created.len(),
            generation,
            "Manuscript ingested"
        );
        Ok(created)
    }

    async fn require_project(&self, project_id: Uuid) -> Result<Project, LifecycleError> {
        self.projects
            .get(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", project_id)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryProjectStore, MemoryUnitStore};
    use crate::models::UnitStatus;
    use crate::services::progress_notifier::ProgressNotifier;
    use std::time::Duration;

    fn ingestor() -> (ManuscriptIngestor, Arc<dyn ProjectStore>) {
        let units: Arc<dyn UnitStore> = Arc::new(MemoryUnitStore::new());
        let projects: Arc<dyn ProjectStore> = Arc::new(MemoryProjectStore::new());
        let notifier = Arc::new(ProgressNotifier::new(8, Duration::from_secs(60)));
        let lifecycle = Arc::new(UnitLifecycle::new(Arc::clone(&units), notifier, 3));
        (
            ManuscriptIngestor::new(units, Arc::clone(&projects), lifecycle),
            projects,
        )
    }

    #[tokio::test]
    async fn test_ingest_creates_units_in_order() {
        let (ingestor, projects) = ingestor();
        let project = ingestor.create_project("Novel").await.unwrap();

        let units = ingestor
            .ingest_manuscript(project.id, Manuscript::new("Chapter 1\n\nText A.\n\nChapter 2\n\nText B."))
            .await
            .unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].title, "Chapter 1");
        assert_eq!(units[1].title, "Chapter 2");
        assert_eq!(units[0].ordinal, 1);
        assert_eq!(units[1].ordinal, 2);
        assert!(units.iter().all(|u| u.status() == UnitStatus::Created));

        let stored = projects.get(project.id).await.unwrap().unwrap();
        assert_eq!(stored.generation, 1);
    }

    #[tokio::test]
    async fn test_second_manuscript_continues_ordinals() {
        let (ingestor, projects) = ingestor();
        let project = ingestor.create_project("Novel").await.unwrap();
        let group = ingestor.create_group(project.id, "Part One").await.unwrap();

        let units = ingestor
            .ingest_manuscript(
                project.id,
                Manuscript::new("Chapter 1\n\nText A.").with_parent(group.id),
            )
            .await
            .unwrap();
        assert_eq!(units[0].ordinal, 2);
        assert_eq!(units[0].parent_id, Some(group.id));

        let more = ingestor
            .ingest_manuscript(project.id, Manuscript::new("Chapter 2\n\nText B."))
            .await
            .unwrap();
        assert_eq!(more[0].ordinal, 3);
        assert_eq!(projects.get(project.id).await.unwrap().unwrap().generation, 2);
    }

    #[tokio::test]
    async fn test_parent_must_be_group_of_same_project() {
        let (ingestor, _) = ingestor();
        let project = ingestor.create_project("Novel").await.unwrap();
        let other = ingestor.create_project("Other").await.unwrap();
        let foreign_group = ingestor.create_group(other.id, "Part One").await.unwrap();

        let err = ingestor
            .ingest_manuscript(project.id, Manuscript::new("Text.").with_parent(foreign_group.id))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Store(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_empty_manuscript_creates_nothing() {
        let (ingestor, projects) = ingestor();
        let project = ingestor.create_project("Novel").await.unwrap();

        let units = ingestor
            .ingest_manuscript(project.id, Manuscript::new("\n\n"))
            .await
            .unwrap();
        assert!(units.is_empty());
        assert_eq!(projects.get(project.id).await.unwrap().unwrap().generation, 0);
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let (ingestor, _) = ingestor();
        let err = ingestor
            .ingest_manuscript(Uuid::new_v4(), Manuscript::new("Text."))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Store(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_blank_project_title_rejected() {
        let (ingestor, _) = ingestor();
        assert!(ingestor.create_project("   ").await.is_err());
    }
}
