//! Canonical container and item state.
//!
//! The [`Repository`] trait is the storage boundary of the engine. Every write
//! carries the version the caller planned against; a mismatch fails with
//! [`RepositoryError::StorageConflict`] and nothing is applied. Planners never
//! touch the repository directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RepositoryError;
use crate::geometry::{overlaps, within_bounds};
use crate::model::{ActionType, ActivityEntry, Container, Item, ItemStatus, PlacementPlan};
use crate::types::{Dimensional, EPSILON_GENERAL};

/// Consistent view of the stored state at one version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepositorySnapshot {
    pub version: u64,
    pub containers: Vec<Container>,
    pub items: Vec<Item>,
}

impl RepositorySnapshot {
    pub fn container(&self, id: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Items placed in the given container.
    pub fn items_in(&self, container_id: &str) -> Vec<Item> {
        self.items
            .iter()
            .filter(|item| item.is_in(container_id))
            .cloned()
            .collect()
    }

    /// Items waiting for the placement planner.
    pub fn pending_items(&self) -> Vec<Item> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Pending && !item.is_waste && !item.is_placed())
            .cloned()
            .collect()
    }
}

/// A batch of item mutations applied atomically.
#[derive(Clone, Debug, Default)]
pub struct ItemChanges {
    /// Items replaced by id, or inserted when unknown
    pub upserts: Vec<Item>,
    /// Ids of items to delete
    pub removals: Vec<String>,
    /// Activity entries recorded with the change
    pub log: Vec<ActivityEntry>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// Activity log query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub item_id: Option<String>,
    pub user_id: Option<String>,
    pub action_type: Option<ActionType>,
}

impl LogFilter {
    pub fn matches(&self, entry: &ActivityEntry) -> bool {
        self.start.is_none_or(|start| entry.timestamp >= start)
            && self.end.is_none_or(|end| entry.timestamp <= end)
            && self
                .item_id
                .as_deref()
                .is_none_or(|id| entry.item_id.as_deref() == Some(id))
            && self.user_id.as_deref().is_none_or(|user| entry.user_id == user)
            && self.action_type.is_none_or(|action| entry.action_type == action)
    }
}

/// Storage boundary of the engine.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Reads containers and items at one consistent version.
    async fn snapshot(&self) -> Result<RepositorySnapshot, RepositoryError>;

    async fn load_containers(&self) -> Result<Vec<Container>, RepositoryError>;

    /// Loads all items, or only those placed in `container_id`.
    async fn load_items(&self, container_id: Option<&str>) -> Result<Vec<Item>, RepositoryError>;

    /// Anchors every assignment of `plan`. Returns the new version.
    async fn commit_placement(
        &self,
        expected_version: u64,
        plan: &PlacementPlan,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Takes the target and the set-aside items out of their container and
    /// consumes one use of the target. Returns the new version.
    async fn commit_retrieval(
        &self,
        expected_version: u64,
        item_id: &str,
        set_aside: &[String],
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Applies arbitrary item changes. Returns the new version.
    async fn commit_item_changes(
        &self,
        expected_version: u64,
        changes: ItemChanges,
    ) -> Result<u64, RepositoryError>;

    /// Inserts containers or updates their zone. Dimensions are immutable.
    async fn import_containers(&self, containers: Vec<Container>) -> Result<u64, RepositoryError>;

    /// Inserts items or updates their metadata.
    async fn import_items(&self, items: Vec<Item>) -> Result<u64, RepositoryError>;

    /// Records entries that do not change item state.
    async fn append_log(&self, entries: Vec<ActivityEntry>) -> Result<(), RepositoryError>;

    async fn activity_log(&self, filter: &LogFilter) -> Result<Vec<ActivityEntry>, RepositoryError>;
}

#[derive(Debug, Default)]
struct StoreState {
    version: u64,
    containers: Vec<Container>,
    items: Vec<Item>,
    log: Vec<ActivityEntry>,
}

impl StoreState {
    fn check_version(&self, expected: u64) -> Result<(), RepositoryError> {
        if self.version == expected {
            Ok(())
        } else {
            Err(RepositoryError::StorageConflict {
                expected,
                actual: self.version,
            })
        }
    }

    fn container(&self, id: &str) -> Result<&Container, RepositoryError> {
        self.containers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "container",
                id: id.to_string(),
            })
    }

    fn item_index(&self, id: &str) -> Result<usize, RepositoryError> {
        self.items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "item",
                id: id.to_string(),
            })
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// Process-local repository guarded by an async read/write lock.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<StoreState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository holding the given records at version 0.
    pub fn with_data(containers: Vec<Container>, items: Vec<Item>) -> Self {
        Self {
            state: RwLock::new(StoreState {
                version: 0,
                containers,
                items,
                log: Vec::new(),
            }),
        }
    }

    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn snapshot(&self) -> Result<RepositorySnapshot, RepositoryError> {
        let state = self.state.read().await;
        Ok(RepositorySnapshot {
            version: state.version,
            containers: state.containers.clone(),
            items: state.items.clone(),
        })
    }

    async fn load_containers(&self) -> Result<Vec<Container>, RepositoryError> {
        Ok(self.state.read().await.containers.clone())
    }

    async fn load_items(&self, container_id: Option<&str>) -> Result<Vec<Item>, RepositoryError> {
        let state = self.state.read().await;
        Ok(match container_id {
            Some(id) => state.items.iter().filter(|i| i.is_in(id)).cloned().collect(),
            None => state.items.clone(),
        })
    }

    async fn commit_placement(
        &self,
        expected_version: u64,
        plan: &PlacementPlan,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        state.check_version(expected_version)?;

        let mut items = state.items.clone();
        let mut entries = Vec::with_capacity(plan.len());
        for assignment in &plan.assignments {
            let container = state.container(&assignment.container_id)?;
            let idx = state.item_index(&assignment.item_id)?;
            if items[idx].is_placed() {
                return Err(RepositoryError::Rejected(format!(
                    "item {} is already placed",
                    assignment.item_id
                )));
            }

            let position = assignment.position;
            position
                .validate()
                .map_err(|err| RepositoryError::Rejected(err.to_string()))?;
            let bbox = position.bounding_box();
            let inside = within_bounds(&bbox, container, EPSILON_GENERAL)
                .map_err(|err| RepositoryError::Integrity(err.to_string()))?;
            if !inside {
                return Err(RepositoryError::Rejected(format!(
                    "item {} would leave container {}",
                    assignment.item_id, container.id
                )));
            }
            if let Some(clash) = items.iter().find(|other| {
                other.is_in(&container.id)
                    && other
                        .placed_box()
                        .is_some_and(|placed| overlaps(&placed, &bbox, EPSILON_GENERAL))
            }) {
                return Err(RepositoryError::Rejected(format!(
                    "item {} would overlap item {}",
                    assignment.item_id, clash.id
                )));
            }

            let item = &mut items[idx];
            item.container_id = Some(container.id.clone());
            item.position = Some(position);
            item.status = ItemStatus::Stowed;
            entries.push(ActivityEntry::new(
                timestamp,
                actor,
                ActionType::Placement,
                Some(item.id.clone()),
                json!({
                    "containerId": container.id,
                    "position": position,
                    "source": "optimize",
                }),
            ));
        }

        state.items = items;
        state.log.extend(entries);
        let version = state.bump();
        debug!(version, placed = plan.len(), "Placement committed");
        Ok(version)
    }

    async fn commit_retrieval(
        &self,
        expected_version: u64,
        item_id: &str,
        set_aside: &[String],
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        state.check_version(expected_version)?;

        let target_idx = state.item_index(item_id)?;
        let mut set_aside_idx = Vec::with_capacity(set_aside.len());
        for id in set_aside {
            let idx = state.item_index(id)?;
            if !state.items[idx].is_placed() {
                return Err(RepositoryError::Rejected(format!(
                    "item {id} cannot be set aside: it is not stowed"
                )));
            }
            set_aside_idx.push(idx);
        }

        let mut entries = Vec::new();
        let target = &mut state.items[target_idx];
        let previous_container = target.container_id.clone();
        let previous_position = target.position;
        let old_uses = target.uses_remaining;
        target.unanchor();
        let depleted = target.consume_use();
        if depleted {
            target.is_waste = true;
        }
        entries.push(ActivityEntry::new(
            timestamp,
            actor,
            ActionType::Retrieval,
            Some(target.id.clone()),
            json!({
                "previousContainer": previous_container,
                "previousPosition": previous_position,
                "oldUsesRemaining": old_uses,
                "newUsesRemaining": target.uses_remaining,
            }),
        ));
        if depleted {
            entries.push(ActivityEntry::new(
                timestamp,
                actor,
                ActionType::Disposal,
                Some(target.id.clone()),
                json!({ "reason": "Out of Uses" }),
            ));
        }

        for idx in set_aside_idx {
            let item = &mut state.items[idx];
            let previous_container = item.container_id.clone();
            item.unanchor();
            entries.push(ActivityEntry::new(
                timestamp,
                actor,
                ActionType::Rearrangement,
                Some(item.id.clone()),
                json!({
                    "previousContainer": previous_container,
                    "setAsideFor": item_id,
                }),
            ));
        }

        state.log.extend(entries);
        let version = state.bump();
        debug!(version, item_id, set_aside = set_aside.len(), "Retrieval committed");
        Ok(version)
    }

    async fn commit_item_changes(
        &self,
        expected_version: u64,
        changes: ItemChanges,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        state.check_version(expected_version)?;

        for item in &changes.upserts {
            if let Some(container_id) = &item.container_id {
                state.container(container_id)?;
            }
        }
        for id in &changes.removals {
            state.item_index(id)?;
        }

        let mut items = state.items.clone();
        items.retain(|item| !changes.removals.contains(&item.id));
        for update in changes.upserts {
            match items.iter_mut().find(|i| i.id == update.id) {
                Some(existing) => *existing = update,
                None => items.push(update),
            }
        }

        state.items = items;
        state.log.extend(changes.log);
        let version = state.bump();
        debug!(version, "Item changes committed");
        Ok(version)
    }

    async fn import_containers(&self, containers: Vec<Container>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut merged = state.containers.clone();
        for container in containers {
            container
                .validate()
                .map_err(|err| RepositoryError::Rejected(format!("container {}: {err}", container.id)))?;
            match merged.iter_mut().find(|c| c.id == container.id) {
                Some(existing) => {
                    if existing.dimensions() != container.dimensions() {
                        return Err(RepositoryError::Rejected(format!(
                            "container {}: dimensions are immutable",
                            container.id
                        )));
                    }
                    existing.zone = container.zone;
                }
                None => merged.push(container),
            }
        }
        state.containers = merged;
        Ok(state.bump())
    }

    async fn import_items(&self, items: Vec<Item>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut merged = state.items.clone();
        for item in items {
            item.validate()
                .map_err(|err| RepositoryError::Rejected(format!("item {}: {err}", item.id)))?;
            match merged.iter_mut().find(|i| i.id == item.id) {
                Some(existing) => {
                    if existing.is_placed() && existing.dimensions() != item.dimensions() {
                        return Err(RepositoryError::Rejected(format!(
                            "item {}: cannot resize a stowed item",
                            item.id
                        )));
                    }
                    merge_catalogue(existing, item);
                }
                None => merged.push(item),
            }
        }
        state.items = merged;
        Ok(state.bump())
    }

    async fn append_log(&self, entries: Vec<ActivityEntry>) -> Result<(), RepositoryError> {
        self.state.write().await.log.extend(entries);
        Ok(())
    }

    async fn activity_log(&self, filter: &LogFilter) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .log
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}

/// Refreshes the catalogue fields of a known item from an import row.
///
/// Stowage state (container, position, status, waste flag) stays as it is.
/// Remaining uses are kept and capped by the new usage limit.
fn merge_catalogue(existing: &mut Item, row: Item) {
    existing.name = row.name;
    existing.width = row.width;
    existing.depth = row.depth;
    existing.height = row.height;
    existing.mass = row.mass;
    existing.priority = row.priority;
    existing.expiry_date = row.expiry_date;
    existing.preferred_zone = row.preferred_zone;
    existing.uses_remaining = match (row.usage_limit, existing.uses_remaining) {
        (Some(limit), Some(remaining)) => Some(remaining.min(limit)),
        (Some(limit), None) => Some(limit),
        (None, _) => None,
    };
    existing.usage_limit = row.usage_limit;
}
