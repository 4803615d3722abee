//! In-memory stores
//!
//! Same contracts as the SQLite stores, backed by maps behind a tokio
//! `RwLock`. Used by tests and by `--in-memory` runs.

use std::collections::{BTreeSet, HashMap};

use folio_common::{Error, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{AnalysisResult, NarrativeUnit, Project, StatusCounts, UnitStatus, UnitVersion};
use crate::types::{ProjectStore, UnitStore};

#[derive(Default)]
pub struct MemoryUnitStore {
    units: RwLock<HashMap<Uuid, NarrativeUnit>>,
    results: RwLock<HashMap<Uuid, AnalysisResult>>,
}

impl MemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_ordinal(mut units: Vec<NarrativeUnit>) -> Vec<NarrativeUnit> {
    units.sort_by(|a, b| {
        a.project_id
            .cmp(&b.project_id)
            .then(a.ordinal.cmp(&b.ordinal))
    });
    units
}

#[async_trait::async_trait]
impl UnitStore for MemoryUnitStore {
    async fn insert(&self, unit: &NarrativeUnit) -> Result<()> {
        let mut units = self.units.write().await;
        if units.contains_key(&unit.id) {
            return Err(Error::InvalidInput(format!("Unit already exists: {}", unit.id)));
        }
        units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn get(&self, unit_id: Uuid) -> Result<Option<NarrativeUnit>> {
        Ok(self.units.read().await.get(&unit_id).cloned())
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<NarrativeUnit>> {
        let units = self.units.read().await;
        Ok(sorted_by_ordinal(
            units
                .values()
                .filter(|u| u.project_id == project_id)
                .cloned()
                .collect(),
        ))
    }

    async fn compare_and_swap(&self, unit: &NarrativeUnit, expected: UnitVersion) -> Result<bool> {
        let mut units = self.units.write().await;
        match units.get_mut(&unit.id) {
            Some(stored) if stored.version() == expected => {
                *stored = unit.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn list_retry_candidates(&self, max_retry_count: u32) -> Result<Vec<NarrativeUnit>> {
        let units = self.units.read().await;
        Ok(sorted_by_ordinal(
            units
                .values()
                .filter(|u| u.is_retry_candidate(max_retry_count))
                .cloned()
                .collect(),
        ))
    }

    async fn list_exhausted(
        &self,
        project_id: Uuid,
        max_retry_count: u32,
    ) -> Result<Vec<NarrativeUnit>> {
        let units = self.units.read().await;
        Ok(sorted_by_ordinal(
            units
                .values()
                .filter(|u| {
                    u.project_id == project_id
                        && u.kind.is_analyzable()
                        && u.is_exhausted(max_retry_count)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn status_counts(&self, project_id: Uuid) -> Result<StatusCounts> {
        let units = self.units.read().await;
        let mut counts = StatusCounts::default();
        for unit in units
            .values()
            .filter(|u| u.project_id == project_id && u.kind.is_analyzable())
        {
            counts.add(unit.status(), 1);
        }
        Ok(counts)
    }

    async fn count_in_group(&self, parent_id: Uuid) -> Result<u32> {
        let units = self.units.read().await;
        Ok(units
            .values()
            .filter(|u| u.parent_id == Some(parent_id) && u.kind.is_analyzable())
            .count() as u32)
    }

    async fn max_ordinal(&self, project_id: Uuid) -> Result<u32> {
        let units = self.units.read().await;
        Ok(units
            .values()
            .filter(|u| u.project_id == project_id)
            .map(|u| u.ordinal)
            .max()
            .unwrap_or(0))
    }

    async fn save_result(&self, unit_id: Uuid, result: &AnalysisResult) -> Result<()> {
        if !self.units.read().await.contains_key(&unit_id) {
            return Err(Error::NotFound(format!("Unit not found: {}", unit_id)));
        }
        self.results.write().await.insert(unit_id, result.clone());
        Ok(())
    }

    async fn load_result(&self, unit_id: Uuid) -> Result<Option<AnalysisResult>> {
        Ok(self.results.read().await.get(&unit_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<Uuid, Project>>,
    entities: RwLock<HashMap<Uuid, BTreeSet<String>>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn insert(&self, project: &Project) -> Result<()> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(Error::InvalidInput(format!(
                "Project already exists: {}",
                project.id
            )));
        }
        projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get(&self, project_id: Uuid) -> Result<Option<Project>> {
        Ok(self.projects.read().await.get(&project_id).cloned())
    }

    async fn advance_cohort(&self, project_id: Uuid) -> Result<u32> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(&project_id)
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", project_id)))?;
        project.generation += 1;
        Ok(project.generation)
    }

    async fn claim_merge(&self, project_id: Uuid, generation: u32) -> Result<bool> {
        let mut projects = self.projects.write().await;
        match projects.get_mut(&project_id) {
            Some(project)
                if project.generation == generation && project.merged_generation < generation =>
            {
                project.merged_generation = generation;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_merge(&self, project_id: Uuid, generation: u32) -> Result<()> {
        let mut projects = self.projects.write().await;
        if let Some(project) = projects.get_mut(&project_id) {
            if project.merged_generation == generation {
                project.merged_generation = generation.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn list_awaiting_merge(&self) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        let mut awaiting: Vec<Project> = projects
            .values()
            .filter(|p| p.awaiting_merge())
            .cloned()
            .collect();
        awaiting.sort_by_key(|p| p.created_at);
        Ok(awaiting)
    }

    async fn record_entities(&self, project_id: Uuid, names: &[String]) -> Result<()> {
        let mut entities = self.entities.write().await;
        let known = entities.entry(project_id).or_default();
        known.extend(names.iter().filter(|n| !n.is_empty()).cloned());
        Ok(())
    }

    async fn known_entities(&self, project_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&project_id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }
}
