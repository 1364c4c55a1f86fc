//! Engine facade.
//!
//! Orchestrates the planners against a [`Repository`]. Every mutating
//! operation follows the same shape: read a snapshot, validate it, plan, and
//! commit once against the snapshot's version. A version conflict restarts the
//! whole step, up to the configured number of attempts with doubling backoff.
//!
//! Retrieval, confirmation and explicit placement of an item are serialized
//! per item id, so one item is never claimed by two plans at once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::csv_io::{self, RowError};
use crate::error::{EngineError, EngineResult, GeometryError, PlanningError, RepositoryError};
use crate::geometry::{is_orientation_of, overlaps, validate_coordinates, within_bounds};
use crate::model::{
    ActionType, ActivityEntry, Container, Item, ItemStatus, Position, RetrievalStep,
};
use crate::placement::{
    ContainerSnapshot, ContainerUtilization, PlacementConfig, PlacementEvent, PlacementOutcome,
    UnplacedItem, plan_placement, plan_placement_with_progress,
};
use crate::repository::{ItemChanges, LogFilter, Repository, RepositorySnapshot};
use crate::retrieval::{RetrievalConfig, RetrievalPlan, plan_retrieval};
use crate::simulation::{self, SimulationChanges, SimulationRequest, SimulationStatus};
use crate::types::Dimensional;
use crate::waste::{self, ReturnPlan, ReturnPlanRequest, WasteItem};

/// Settings of the engine facade.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub placement: PlacementConfig,
    pub retrieval: RetrievalConfig,
    /// Attempts per planning step before giving up on conflicts
    pub commit_attempts: u32,
    /// Delay before the first retry; doubled for each further retry
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placement: PlacementConfig::default(),
            retrieval: RetrievalConfig::default(),
            commit_attempts: 3,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

/// Outcome of one planning attempt.
enum StepError {
    Conflict { expected: u64, actual: u64 },
    Failed(EngineError),
}

impl From<EngineError> for StepError {
    fn from(err: EngineError) -> Self {
        StepError::Failed(err)
    }
}

impl From<RepositoryError> for StepError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StorageConflict { expected, actual } => {
                StepError::Conflict { expected, actual }
            }
            other => StepError::Failed(other.into()),
        }
    }
}

impl From<PlanningError> for StepError {
    fn from(err: PlanningError) -> Self {
        StepError::Failed(err.into())
    }
}

impl From<GeometryError> for StepError {
    fn from(err: GeometryError) -> Self {
        StepError::Failed(err.into())
    }
}

type Step<T> = Result<T, StepError>;

/// Per-item mutexes. An entry lives only while some task holds or waits
/// for its lock.
#[derive(Default)]
struct ItemLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ItemLocks {
    async fn acquire(&self, item_id: &str) -> ItemGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(item_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        ItemGuard {
            owner: self,
            item_id: item_id.to_string(),
            guard: Some(guard),
        }
    }

    fn release(&self, item_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(item_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(item_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct ItemGuard<'a> {
    owner: &'a ItemLocks,
    item_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ItemGuard<'_> {
    fn drop(&mut self) {
        // The owned guard keeps its own reference to the lock.
        self.guard.take();
        self.owner.release(&self.item_id);
    }
}

/// A retrieval plan waiting for confirmation.
#[derive(Clone, Debug)]
struct RecordedPlan {
    plan_id: Uuid,
    version: u64,
    plan: RetrievalPlan,
    set_aside: Vec<String>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub success: bool,
    pub placements: usize,
    pub unplaced_items: Vec<UnplacedItem>,
    pub space_utilization: Vec<ContainerUtilization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OptimizeReport {
    fn nothing_to_do(message: &str) -> Self {
        Self {
            success: false,
            placements: 0,
            unplaced_items: Vec::new(),
            space_utilization: Vec::new(),
            message: Some(message.to_string()),
        }
    }
}

/// Search by id, or by exact name when no id is given.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchQuery {
    pub item_id: Option<String>,
    pub item_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    /// `Active`, `Used`, `Expired` or `Waste`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub retrieval_steps: Vec<RetrievalStep>,
    pub total_items: usize,
    pub active_items: usize,
}

/// A recorded retrieval plan returned by [`Engine::retrieve`].
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalTicket {
    pub plan_id: Uuid,
    pub item: Item,
    pub container_id: String,
    pub access_face: String,
    pub retrieval_steps: Vec<RetrievalStep>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfirmation {
    /// Id of the confirmed plan, when one was recorded and still current
    pub plan_id: Option<Uuid>,
    pub item: Item,
    pub retrieval_steps: Vec<RetrievalStep>,
    pub timestamp: DateTime<Utc>,
}

/// Explicit placement of one item.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaceRequest {
    pub item_id: String,
    pub container_id: String,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub space_utilization: f64,
    pub active_items: usize,
    pub waste_items: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UndockingReport {
    pub items_removed: usize,
    pub total_mass: f64,
    pub total_volume: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub new_date: DateTime<Utc>,
    pub changes: SimulationChanges,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub errors: Vec<RowError>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn integrity(message: String) -> EngineError {
    error!(%message, "Repository integrity violation");
    EngineError::Integrity(message)
}

/// Checks that every placed item references an existing container, lies
/// inside it, and overlaps no other item there.
pub fn validate_snapshot(snapshot: &RepositorySnapshot, tolerance: f64) -> EngineResult<()> {
    for item in &snapshot.items {
        let (container_id, position) = match (&item.container_id, &item.position) {
            (Some(container_id), Some(position)) => (container_id, position),
            (None, None) => continue,
            _ => {
                return Err(EngineError::InconsistentSnapshot(format!(
                    "item {} has a container or a position, but not both",
                    item.id
                )));
            }
        };
        let container = snapshot.container(container_id).ok_or_else(|| {
            integrity(format!(
                "item {} is recorded in container {container_id}, which does not exist",
                item.id
            ))
        })?;
        if !within_bounds(&position.bounding_box(), container, tolerance)? {
            return Err(EngineError::InconsistentSnapshot(format!(
                "item {} lies outside container {container_id}",
                item.id
            )));
        }
    }

    for container in &snapshot.containers {
        let placed = snapshot.items_in(&container.id);
        for (idx, a) in placed.iter().enumerate() {
            let Some(box_a) = a.placed_box() else { continue };
            for b in &placed[idx + 1..] {
                if b.placed_box()
                    .is_some_and(|box_b| overlaps(&box_a, &box_b, tolerance))
                {
                    return Err(EngineError::InconsistentSnapshot(format!(
                        "items {} and {} overlap in container {}",
                        a.id, b.id, container.id
                    )));
                }
            }
        }
    }
    Ok(())
}

fn display_status(item: &Item, now: DateTime<Utc>) -> &'static str {
    if !item.is_waste {
        "Active"
    } else if item.uses_remaining == Some(0) {
        "Used"
    } else if item.is_expired(now) {
        "Expired"
    } else {
        "Waste"
    }
}

pub struct Engine {
    repo: Arc<dyn Repository>,
    config: EngineConfig,
    locks: ItemLocks,
    recorded: Mutex<HashMap<String, RecordedPlan>>,
}

impl Engine {
    pub fn new(repo: Arc<dyn Repository>, config: EngineConfig) -> Self {
        Self {
            repo,
            config,
            locks: ItemLocks::default(),
            recorded: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn tolerance(&self) -> f64 {
        self.config.placement.epsilon
    }

    /// Runs `step` until it commits, fails, or the attempt budget is spent.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut step: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Step<T>>,
    {
        let attempts = self.config.commit_attempts.max(1);
        let mut backoff = self.config.retry_backoff;
        for attempt in 1..=attempts {
            match step().await {
                Ok(value) => return Ok(value),
                Err(StepError::Failed(err)) => return Err(err),
                Err(StepError::Conflict { expected, actual }) => {
                    warn!(operation, attempt, expected, actual, "Storage conflict");
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        warn!(operation, attempts, "Giving up after repeated storage conflicts");
        Err(EngineError::ConcurrentModification { attempts })
    }

    async fn validated_snapshot(&self) -> EngineResult<RepositorySnapshot> {
        let snapshot = self.repo.snapshot().await?;
        validate_snapshot(&snapshot, self.tolerance())?;
        Ok(snapshot)
    }

    // ----- placement -----

    /// Places every pending item and commits the plan.
    pub async fn optimize_placement(
        &self,
        actor: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<OptimizeReport> {
        self.optimize_placement_with_progress(actor, now, |_| {}).await
    }

    /// Like [`Engine::optimize_placement`]; `on_event` receives the planner
    /// events of the attempt that was committed.
    pub async fn optimize_placement_with_progress(
        &self,
        actor: &str,
        now: DateTime<Utc>,
        mut on_event: impl FnMut(&PlacementEvent),
    ) -> EngineResult<OptimizeReport> {
        let (report, events) = self
            .with_retry("optimize_placement", move || self.optimize_once(actor, now))
            .await?;
        for event in &events {
            on_event(event);
        }
        Ok(report)
    }

    async fn optimize_once(
        &self,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Step<(OptimizeReport, Vec<PlacementEvent>)> {
        let snapshot = self.validated_snapshot().await?;
        let pending = snapshot.pending_items();
        if pending.is_empty() {
            return Ok((OptimizeReport::nothing_to_do("No unplaced items found for optimization"), Vec::new()));
        }
        if snapshot.containers.is_empty() {
            return Ok((OptimizeReport::nothing_to_do("No containers available for placement"), Vec::new()));
        }

        let containers: Vec<ContainerSnapshot> = snapshot
            .containers
            .iter()
            .map(|c| ContainerSnapshot::new(c.clone(), snapshot.items_in(&c.id)))
            .collect();

        let mut events = Vec::new();
        let outcome = plan_placement_with_progress(&pending, &containers, self.config.placement, |event| {
            debug!(?event, "Placement event");
            events.push(event.clone());
        })?;

        if !outcome.plan.is_empty() {
            self.repo
                .commit_placement(snapshot.version, &outcome.plan, actor, now)
                .await?;
        }

        info!(
            placed = outcome.placed_count(),
            unplaced = outcome.unplaced_count(),
            "Placement optimisation committed"
        );
        let report = OptimizeReport {
            success: true,
            placements: outcome.placed_count(),
            unplaced_items: outcome.unplaced,
            space_utilization: outcome.utilization,
            message: None,
        };
        Ok((report, events))
    }

    /// Plans caller-supplied items into caller-supplied, empty containers
    /// without touching the repository.
    pub fn plan_what_if(&self, items: &[Item], containers: &[Container]) -> EngineResult<PlacementOutcome> {
        let snapshots: Vec<ContainerSnapshot> = containers
            .iter()
            .cloned()
            .map(ContainerSnapshot::empty)
            .collect();
        Ok(plan_placement(items, &snapshots, self.config.placement)?)
    }

    /// Anchors an item at an explicit position.
    ///
    /// The end corner is derived from the start corner and the item's
    /// dimensions. A caller-supplied end corner is kept only when it describes
    /// a permitted orientation of the item.
    pub async fn place(
        &self,
        request: &PlaceRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Item> {
        let _guard = self.locks.acquire(&request.item_id).await;
        let placed = self
            .with_retry("place", move || self.place_once(request, actor, now))
            .await?;
        self.recorded.lock().await.remove(&request.item_id);
        Ok(placed)
    }

    async fn place_once(
        &self,
        request: &PlaceRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Step<Item> {
        let snapshot = self.validated_snapshot().await?;
        let eps = self.tolerance();
        let item = snapshot
            .item(&request.item_id)
            .ok_or_else(|| EngineError::NotFound {
                entity: "item",
                id: request.item_id.clone(),
            })?;
        let container = snapshot
            .container(&request.container_id)
            .ok_or_else(|| EngineError::NotFound {
                entity: "container",
                id: request.container_id.clone(),
            })?;

        let start = request.position.start();
        validate_coordinates(start)?;
        let requested = request.position.extent();
        let extent = if is_orientation_of(requested, item.dimensions(), self.config.placement.allow_rotation, eps) {
            requested
        } else {
            warn!(
                item_id = %item.id,
                ?requested,
                "End coordinates do not match the item's dimensions; deriving them"
            );
            item.dimensions()
        };
        let position = Position::from_start_and_extent(start, extent);
        let bbox = position.bounding_box();

        if !within_bounds(&bbox, container, eps)? {
            return Err(EngineError::PlacementRejected(format!(
                "item {} would leave container {}",
                item.id, container.id
            ))
            .into());
        }
        if let Some(clash) = snapshot.items.iter().find(|other| {
            other.id != item.id
                && other.is_in(&container.id)
                && other
                    .placed_box()
                    .is_some_and(|placed| overlaps(&placed, &bbox, eps))
        }) {
            return Err(EngineError::PlacementRejected(format!(
                "item {} would overlap item {}",
                item.id, clash.id
            ))
            .into());
        }

        let mut updated = item.clone();
        updated.container_id = Some(container.id.clone());
        updated.position = Some(position);
        updated.status = ItemStatus::Stowed;

        let entry = ActivityEntry::new(
            now,
            actor,
            ActionType::Placement,
            Some(item.id.clone()),
            json!({
                "oldContainer": item.container_id,
                "newContainer": container.id,
                "oldPosition": item.position,
                "newPosition": position,
            }),
        );
        self.repo
            .commit_item_changes(
                snapshot.version,
                ItemChanges {
                    upserts: vec![updated.clone()],
                    removals: Vec::new(),
                    log: vec![entry],
                },
            )
            .await?;
        info!(item_id = %updated.id, container_id = %container.id, "Item placed");
        Ok(updated)
    }

    // ----- search and retrieval -----

    /// Finds an item and computes, without recording, its retrieval steps.
    pub async fn search(
        &self,
        query: &SearchQuery,
        actor: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<SearchResult> {
        let (search_type, term) = match (&query.item_id, &query.item_name) {
            (Some(id), _) => ("id", id.as_str()),
            (None, Some(name)) => ("name", name.as_str()),
            (None, None) => {
                return Err(EngineError::InvalidRequest(
                    "either itemId or itemName is required".to_string(),
                ));
            }
        };

        let snapshot = self.validated_snapshot().await?;
        let found = match search_type {
            "id" => snapshot.item(term),
            _ => snapshot.items.iter().find(|item| item.name == term),
        };

        self.repo
            .append_log(vec![ActivityEntry::new(
                now,
                actor,
                ActionType::Search,
                found.map(|item| item.id.clone()),
                json!({ "searchType": search_type, "searchTerm": term, "found": found.is_some() }),
            )])
            .await?;

        let total_items = snapshot.items.len();
        let active_items = snapshot.items.iter().filter(|item| !item.is_waste).count();
        let Some(item) = found else {
            debug!(search_type, term, "Item not found");
            return Ok(SearchResult {
                found: false,
                item: None,
                status: None,
                zone: None,
                retrieval_steps: Vec::new(),
                total_items,
                active_items,
            });
        };

        let container = item
            .container_id
            .as_deref()
            .and_then(|id| snapshot.container(id));
        let retrieval_steps = match container {
            Some(container) if item.is_placed() => {
                plan_retrieval(&item.id, container, &snapshot.items, &[], &self.config.retrieval)?.steps
            }
            _ => Vec::new(),
        };

        Ok(SearchResult {
            found: true,
            item: Some(item.clone()),
            status: Some(display_status(item, now).to_string()),
            zone: container.map(|c| c.zone.clone()),
            retrieval_steps,
            total_items,
            active_items,
        })
    }

    /// Computes and records the retrieval plan for an item.
    ///
    /// Blockers listed in `set_aside` are not put back.
    pub async fn retrieve(
        &self,
        item_id: &str,
        set_aside: &[String],
        actor: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RetrievalTicket> {
        let _guard = self.locks.acquire(item_id).await;
        let snapshot = self.validated_snapshot().await?;
        let (item, plan) = self.plan_for(&snapshot, item_id, set_aside)?;

        let plan_id = Uuid::new_v4();
        let ticket = RetrievalTicket {
            plan_id,
            item: item.clone(),
            container_id: plan.container_id.clone(),
            access_face: plan.face.to_string(),
            retrieval_steps: plan.steps.clone(),
        };

        self.repo
            .append_log(vec![ActivityEntry::new(
                now,
                actor,
                ActionType::RetrievalInitiated,
                Some(item_id.to_string()),
                json!({
                    "planId": plan_id,
                    "containerId": plan.container_id,
                    "position": item.position,
                    "accessFace": plan.face.as_str(),
                    "steps": plan.steps.len(),
                }),
            )])
            .await?;

        self.recorded.lock().await.insert(
            item_id.to_string(),
            RecordedPlan {
                plan_id,
                version: snapshot.version,
                plan,
                set_aside: set_aside.to_vec(),
            },
        );
        info!(item_id, %plan_id, steps = ticket.retrieval_steps.len(), "Retrieval plan recorded");
        Ok(ticket)
    }

    fn plan_for(
        &self,
        snapshot: &RepositorySnapshot,
        item_id: &str,
        set_aside: &[String],
    ) -> EngineResult<(Item, RetrievalPlan)> {
        let item = snapshot.item(item_id).ok_or_else(|| EngineError::NotFound {
            entity: "item",
            id: item_id.to_string(),
        })?;
        let container_id = match (&item.container_id, item.is_placed()) {
            (Some(id), true) => id,
            _ => {
                return Err(EngineError::UnreachableItem {
                    item_id: item_id.to_string(),
                    reason: "item is not stowed in any container".to_string(),
                });
            }
        };
        let container = snapshot.container(container_id).ok_or_else(|| {
            integrity(format!("item {item_id} references missing container {container_id}"))
        })?;
        let plan = plan_retrieval(item_id, container, &snapshot.items, set_aside, &self.config.retrieval)?;
        Ok((item.clone(), plan))
    }

    /// Drops recorded plans of items that were discarded or moved elsewhere.
    async fn forget_plans<'a>(&self, item_ids: impl Iterator<Item = &'a str>) {
        let mut recorded = self.recorded.lock().await;
        for item_id in item_ids {
            if recorded.remove(item_id).is_some() {
                debug!(item_id, "Recorded retrieval plan dropped");
            }
        }
    }

    /// Commits the retrieval of an item.
    ///
    /// Uses the recorded plan when the repository has not moved since it was
    /// computed, and plans afresh otherwise.
    pub async fn confirm_retrieval(
        &self,
        item_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RetrievalConfirmation> {
        let _guard = self.locks.acquire(item_id).await;
        let recorded = self.recorded.lock().await.get(item_id).cloned();
        let recorded_ref = recorded.as_ref();

        let confirmed = self
            .with_retry("confirm_retrieval", move || {
                self.confirm_once(item_id, recorded_ref, actor, now)
            })
            .await;
        if !matches!(confirmed, Err(EngineError::ConcurrentModification { .. })) {
            self.recorded.lock().await.remove(item_id);
        }
        let (plan_id, steps) = confirmed?;

        let item = self
            .repo
            .snapshot()
            .await?
            .item(item_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                entity: "item",
                id: item_id.to_string(),
            })?;
        info!(item_id, uses_remaining = ?item.uses_remaining, is_waste = item.is_waste, "Retrieval confirmed");
        Ok(RetrievalConfirmation {
            plan_id,
            item,
            retrieval_steps: steps,
            timestamp: now,
        })
    }

    async fn confirm_once(
        &self,
        item_id: &str,
        recorded: Option<&RecordedPlan>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Step<(Option<Uuid>, Vec<RetrievalStep>)> {
        let snapshot = self.validated_snapshot().await?;
        let (plan_id, plan) = match recorded {
            Some(recorded) if recorded.version == snapshot.version => {
                (Some(recorded.plan_id), recorded.plan.clone())
            }
            other => {
                let set_aside = other.map(|r| r.set_aside.clone()).unwrap_or_default();
                if other.is_some() {
                    debug!(item_id, "Recorded plan is stale; planning again");
                }
                let (_, plan) = self.plan_for(&snapshot, item_id, &set_aside)?;
                (None, plan)
            }
        };

        let container = snapshot.container(&plan.container_id).ok_or_else(|| {
            integrity(format!("plan references missing container {}", plan.container_id))
        })?;
        plan.replay(container, &snapshot.items, self.tolerance())?;

        let set_aside: Vec<String> = plan.set_aside_ids().into_iter().map(str::to_string).collect();
        self.repo
            .commit_retrieval(snapshot.version, item_id, &set_aside, actor, now)
            .await?;
        Ok((plan_id, plan.steps))
    }

    // ----- queries -----

    pub async fn containers_exist(&self) -> EngineResult<bool> {
        Ok(!self.repo.load_containers().await?.is_empty())
    }

    pub async fn items_exist(&self) -> EngineResult<bool> {
        Ok(!self.repo.load_items(None).await?.is_empty())
    }

    pub async fn container(&self, id: &str) -> EngineResult<Container> {
        self.repo
            .load_containers()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::NotFound {
                entity: "container",
                id: id.to_string(),
            })
    }

    /// Non-waste items placed in a container.
    pub async fn container_items(&self, id: &str) -> EngineResult<Vec<Item>> {
        self.container(id).await?;
        Ok(self
            .repo
            .load_items(Some(id))
            .await?
            .into_iter()
            .filter(|item| !item.is_waste)
            .collect())
    }

    pub async fn system_status(&self) -> EngineResult<SystemStatus> {
        let snapshot = self.repo.snapshot().await?;
        let total: f64 = snapshot.containers.iter().map(|c| c.volume()).sum();
        let used: f64 = snapshot
            .items
            .iter()
            .filter_map(Item::placed_box)
            .map(|bbox| bbox.volume())
            .sum();
        let space_utilization = if total > 0.0 { round2(used / total * 100.0) } else { 0.0 };
        let waste_items = snapshot.items.iter().filter(|item| item.is_waste).count();
        Ok(SystemStatus {
            space_utilization,
            active_items: snapshot.items.len() - waste_items,
            waste_items,
        })
    }

    pub async fn logs(&self, filter: &LogFilter) -> EngineResult<Vec<ActivityEntry>> {
        Ok(self.repo.activity_log(filter).await?)
    }

    // ----- waste -----

    /// Flags expired and used-up items as waste.
    pub async fn identify_waste(&self, actor: &str, now: DateTime<Utc>) -> EngineResult<Vec<WasteItem>> {
        self.with_retry("identify_waste", move || self.identify_waste_once(actor, now))
            .await
    }

    async fn identify_waste_once(&self, actor: &str, now: DateTime<Utc>) -> Step<Vec<WasteItem>> {
        let snapshot = self.repo.snapshot().await?;
        let found = waste::identify_waste(&snapshot.items, now);
        if found.is_empty() {
            return Ok(found);
        }

        let mut changes = ItemChanges::default();
        for waste_item in &found {
            let Some(item) = snapshot.item(&waste_item.item_id) else {
                continue;
            };
            let mut flagged = item.clone();
            flagged.is_waste = true;
            changes.upserts.push(flagged);
            changes.log.push(ActivityEntry::new(
                now,
                actor,
                ActionType::Disposal,
                Some(item.id.clone()),
                json!({ "reason": waste_item.reason.as_str(), "container": item.container_id }),
            ));
        }
        self.repo.commit_item_changes(snapshot.version, changes).await?;
        self.forget_plans(found.iter().map(|waste_item| waste_item.item_id.as_str())).await;
        info!(count = found.len(), "Waste identified");
        Ok(found)
    }

    pub async fn return_plan(
        &self,
        request: &ReturnPlanRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<ReturnPlan> {
        let snapshot = self.validated_snapshot().await?;
        if snapshot.container(&request.undocking_container_id).is_none() {
            return Err(EngineError::NotFound {
                entity: "container",
                id: request.undocking_container_id.clone(),
            });
        }
        if !(request.max_weight >= 0.0) {
            return Err(EngineError::InvalidRequest("maxWeight must be non-negative".to_string()));
        }
        let plan = waste::plan_return(
            &snapshot.items,
            &snapshot.containers,
            request,
            &self.config.retrieval,
            now,
        )?;
        info!(
            items = plan.return_manifest.return_items.len(),
            weight = plan.return_manifest.total_weight,
            "Return plan computed"
        );
        Ok(plan)
    }

    /// Deletes the waste in the undocking container and detaches everything
    /// else stored there.
    pub async fn complete_undocking(
        &self,
        container_id: &str,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<UndockingReport> {
        self.with_retry("complete_undocking", move || {
            self.complete_undocking_once(container_id, actor, timestamp)
        })
        .await
    }

    async fn complete_undocking_once(
        &self,
        container_id: &str,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) -> Step<UndockingReport> {
        let snapshot = self.repo.snapshot().await?;
        if snapshot.container(container_id).is_none() {
            return Err(EngineError::NotFound {
                entity: "container",
                id: container_id.to_string(),
            }
            .into());
        }

        let (waste, kept): (Vec<Item>, Vec<Item>) = snapshot
            .items_in(container_id)
            .into_iter()
            .partition(|item| item.is_waste);
        let report = UndockingReport {
            items_removed: waste.len(),
            total_mass: waste.iter().map(|item| item.mass).sum(),
            total_volume: waste.iter().map(|item| item.volume()).sum(),
        };

        let mut changes = ItemChanges::default();
        for item in &waste {
            changes.removals.push(item.id.clone());
            changes.log.push(ActivityEntry::new(
                timestamp,
                actor,
                ActionType::Disposal,
                Some(item.id.clone()),
                json!({
                    "undockingContainerId": container_id,
                    "disposalType": "undocking",
                    "totalItems": report.items_removed,
                    "totalMass": report.total_mass,
                    "totalVolume": report.total_volume,
                }),
            ));
        }
        for mut item in kept {
            item.unanchor();
            changes.upserts.push(item);
        }
        if !changes.is_empty() {
            let touched: Vec<String> = changes
                .removals
                .iter()
                .cloned()
                .chain(changes.upserts.iter().map(|item| item.id.clone()))
                .collect();
            self.repo.commit_item_changes(snapshot.version, changes).await?;
            self.forget_plans(touched.iter().map(String::as_str)).await;
        }
        info!(container_id, removed = report.items_removed, "Undocking completed");
        Ok(report)
    }

    // ----- simulation -----

    pub async fn simulate(
        &self,
        request: &SimulationRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<SimulationReport> {
        let days = request.days(now)?;

        self.with_retry("simulate", move || self.simulate_once(request, days, now))
            .await
    }

    async fn simulate_once(
        &self,
        request: &SimulationRequest,
        days: u32,
        now: DateTime<Utc>,
    ) -> Step<SimulationReport> {
        let snapshot = self.repo.snapshot().await?;
        let outcome = simulation::simulate(&snapshot.items, now, days, &request.items_to_be_used_per_day)
            .map_err(EngineError::from)?;
        if !outcome.updated.is_empty() || !outcome.log.is_empty() {
            let discarded: Vec<String> = outcome
                .updated
                .iter()
                .filter(|item| item.is_waste)
                .map(|item| item.id.clone())
                .collect();
            self.repo
                .commit_item_changes(
                    snapshot.version,
                    ItemChanges {
                        upserts: outcome.updated,
                        removals: Vec::new(),
                        log: outcome.log,
                    },
                )
                .await?;
            self.forget_plans(discarded.iter().map(String::as_str)).await;
        }
        info!(
            days,
            used = outcome.changes.total_items_used,
            expired = outcome.changes.total_items_expired,
            "Simulation committed"
        );
        Ok(SimulationReport {
            new_date: outcome.new_date,
            changes: outcome.changes,
        })
    }

    pub async fn simulation_status(&self, now: DateTime<Utc>) -> EngineResult<SimulationStatus> {
        let items = self.repo.load_items(None).await?;
        Ok(SimulationStatus::from_items(&items, now))
    }

    // ----- import / export -----

    pub async fn import_containers_csv(&self, text: &str) -> EngineResult<ImportSummary> {
        let report = csv_io::parse_containers(text).map_err(|err| EngineError::Import(err.to_string()))?;
        let imported = report.records.len();
        if imported > 0 {
            self.repo
                .import_containers(report.records)
                .await
                .map_err(import_error)?;
        }
        info!(imported, rejected = report.errors.len(), "Containers imported");
        Ok(ImportSummary {
            imported,
            errors: report.errors,
        })
    }

    pub async fn import_items_csv(&self, text: &str) -> EngineResult<ImportSummary> {
        let report = csv_io::parse_items(text).map_err(|err| EngineError::Import(err.to_string()))?;
        let imported = report.records.len();
        if imported > 0 {
            self.repo
                .import_items(report.records)
                .await
                .map_err(import_error)?;
        }
        info!(imported, rejected = report.errors.len(), "Items imported");
        Ok(ImportSummary {
            imported,
            errors: report.errors,
        })
    }

    pub async fn export_arrangement(&self) -> EngineResult<String> {
        let items = self.repo.load_items(None).await?;
        csv_io::export_arrangement(&items).map_err(|err| EngineError::Import(err.to_string()))
    }
}

fn import_error(err: RepositoryError) -> EngineError {
    match err {
        RepositoryError::Rejected(message) => EngineError::Import(message),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetrievalAction;
    use crate::repository::InMemoryRepository;
    use crate::types::Vec3;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry_backoff: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    fn container(id: &str, zone: &str) -> Container {
        Container::new(id, zone, (100.0, 100.0, 100.0)).unwrap()
    }

    fn cube(id: &str, side: f64) -> Item {
        Item::new(id, format!("Item {id}"), (side, side, side), 50, "Lab").unwrap()
    }

    fn engine_with(containers: Vec<Container>, items: Vec<Item>) -> (Engine, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::with_data(containers, items));
        let engine = Engine::new(repo.clone(), fast_config());
        (engine, repo)
    }

    /// Target `T` stowed behind `B` along the depth axis.
    fn buried_target() -> (Engine, Arc<InMemoryRepository>) {
        engine_with(
            vec![container("c1", "Lab")],
            vec![
                cube("T", 50.0).with_usage_limit(1).placed_at_start("c1", (0.0, 50.0, 0.0)),
                cube("B", 50.0).placed_at_start("c1", (0.0, 0.0, 0.0)),
            ],
        )
    }

    /// Delegating repository that reports a conflict for the first commits.
    struct ConflictingRepository {
        inner: InMemoryRepository,
        conflicts: AtomicU32,
    }

    impl ConflictingRepository {
        fn conflict(&self) -> Result<(), RepositoryError> {
            let left = self.conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts.store(left - 1, Ordering::SeqCst);
                return Err(RepositoryError::StorageConflict { expected: 0, actual: 1 });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Repository for ConflictingRepository {
        async fn snapshot(&self) -> Result<RepositorySnapshot, RepositoryError> {
            self.inner.snapshot().await
        }
        async fn load_containers(&self) -> Result<Vec<Container>, RepositoryError> {
            self.inner.load_containers().await
        }
        async fn load_items(&self, container_id: Option<&str>) -> Result<Vec<Item>, RepositoryError> {
            self.inner.load_items(container_id).await
        }
        async fn commit_placement(
            &self,
            expected_version: u64,
            plan: &crate::model::PlacementPlan,
            actor: &str,
            timestamp: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            self.conflict()?;
            self.inner.commit_placement(expected_version, plan, actor, timestamp).await
        }
        async fn commit_retrieval(
            &self,
            expected_version: u64,
            item_id: &str,
            set_aside: &[String],
            actor: &str,
            timestamp: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            self.conflict()?;
            self.inner
                .commit_retrieval(expected_version, item_id, set_aside, actor, timestamp)
                .await
        }
        async fn commit_item_changes(
            &self,
            expected_version: u64,
            changes: ItemChanges,
        ) -> Result<u64, RepositoryError> {
            self.conflict()?;
            self.inner.commit_item_changes(expected_version, changes).await
        }
        async fn import_containers(&self, containers: Vec<Container>) -> Result<u64, RepositoryError> {
            self.inner.import_containers(containers).await
        }
        async fn import_items(&self, items: Vec<Item>) -> Result<u64, RepositoryError> {
            self.inner.import_items(items).await
        }
        async fn append_log(&self, entries: Vec<ActivityEntry>) -> Result<(), RepositoryError> {
            self.inner.append_log(entries).await
        }
        async fn activity_log(&self, filter: &LogFilter) -> Result<Vec<ActivityEntry>, RepositoryError> {
            self.inner.activity_log(filter).await
        }
    }

    fn conflicting_with(containers: Vec<Container>, items: Vec<Item>, conflicts: u32) -> Engine {
        let repo = ConflictingRepository {
            inner: InMemoryRepository::with_data(containers, items),
            conflicts: AtomicU32::new(conflicts),
        };
        Engine::new(Arc::new(repo), fast_config())
    }

    fn conflicting(conflicts: u32) -> Engine {
        conflicting_with(vec![container("c1", "Lab")], vec![cube("a", 10.0)], conflicts)
    }

    #[tokio::test]
    async fn optimize_commits_pending_items() {
        let (engine, repo) = engine_with(
            vec![container("c1", "Lab")],
            vec![cube("a", 50.0), cube("b", 50.0), cube("huge", 150.0)],
        );
        let report = engine.optimize_placement("crew", now()).await.unwrap();
        assert!(report.success);
        assert_eq!(report.placements, 2);
        assert_eq!(report.unplaced_items.len(), 1);
        assert_eq!(report.unplaced_items[0].item_id, "huge");
        assert_eq!(report.space_utilization[0].percent, 25.0);

        let stowed = repo.load_items(Some("c1")).await.unwrap();
        assert_eq!(stowed.len(), 2);

        // Only the oversized item is still pending.
        let again = engine.optimize_placement("crew", now()).await.unwrap();
        assert_eq!(again.placements, 0);
        assert_eq!(again.unplaced_items.len(), 1);
    }

    #[tokio::test]
    async fn optimize_without_pending_items_reports_a_message() {
        let (engine, _) = engine_with(vec![container("c1", "Lab")], Vec::new());
        let report = engine.optimize_placement("crew", now()).await.unwrap();
        assert!(!report.success);
        assert!(report.message.is_some());
    }

    #[tokio::test]
    async fn optimize_forwards_committed_events() {
        let (engine, _) = engine_with(vec![container("c1", "Lab")], vec![cube("a", 10.0)]);
        let mut events = Vec::new();
        engine
            .optimize_placement_with_progress("crew", now(), |event| events.push(event.clone()))
            .await
            .unwrap();
        assert!(matches!(events.first(), Some(PlacementEvent::ItemPlaced { .. })));
        assert!(matches!(events.last(), Some(PlacementEvent::Finished { placed: 1, unplaced: 0 })));
    }

    #[tokio::test]
    async fn conflicts_are_retried_within_budget() {
        let engine = conflicting(2);
        let report = engine.optimize_placement("crew", now()).await.unwrap();
        assert_eq!(report.placements, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_concurrent_modification() {
        let engine = conflicting(3);
        let err = engine.optimize_placement("crew", now()).await.unwrap_err();
        assert_eq!(err, EngineError::ConcurrentModification { attempts: 3 });
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn search_returns_retrieval_steps_and_logs() {
        let (engine, repo) = buried_target();
        let query = SearchQuery {
            item_id: Some("T".into()),
            item_name: None,
        };
        let result = engine.search(&query, "crew", now()).await.unwrap();
        assert!(result.found);
        assert_eq!(result.status.as_deref(), Some("Active"));
        assert_eq!(result.zone.as_deref(), Some("Lab"));
        let actions: Vec<(RetrievalAction, &str)> = result
            .retrieval_steps
            .iter()
            .map(|s| (s.action, s.item_id.as_str()))
            .collect();
        assert_eq!(
            actions,
            vec![
                (RetrievalAction::Remove, "B"),
                (RetrievalAction::Retrieve, "T"),
                (RetrievalAction::PlaceBack, "B"),
            ]
        );

        let by_name = SearchQuery {
            item_id: None,
            item_name: Some("Item B".into()),
        };
        let result = engine.search(&by_name, "crew", now()).await.unwrap();
        assert_eq!(result.item.unwrap().id, "B");

        let searches = LogFilter {
            action_type: Some(ActionType::Search),
            ..LogFilter::default()
        };
        assert_eq!(repo.activity_log(&searches).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_requires_a_term() {
        let (engine, _) = buried_target();
        let err = engine.search(&SearchQuery::default(), "crew", now()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn retrieve_then_confirm_takes_the_item_out() {
        let (engine, repo) = buried_target();
        let ticket = engine.retrieve("T", &[], "crew", now()).await.unwrap();
        assert_eq!(ticket.retrieval_steps.len(), 3);
        assert_eq!(ticket.access_face, "front");

        let confirmation = engine.confirm_retrieval("T", "crew", now()).await.unwrap();
        assert_eq!(confirmation.plan_id, Some(ticket.plan_id));
        assert_eq!(confirmation.item.status, ItemStatus::InTransit);
        assert_eq!(confirmation.item.uses_remaining, Some(0));
        assert!(confirmation.item.is_waste);

        let snapshot = repo.snapshot().await.unwrap();
        assert!(snapshot.item("B").unwrap().is_in("c1"));

        let initiated = LogFilter {
            action_type: Some(ActionType::RetrievalInitiated),
            ..LogFilter::default()
        };
        assert_eq!(repo.activity_log(&initiated).await.unwrap().len(), 1);

        // A second confirmation finds nothing stowed.
        let err = engine.confirm_retrieval("T", "crew", now()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnreachableItem { .. }));
    }

    #[tokio::test]
    async fn set_aside_blockers_leave_with_the_target() {
        let (engine, repo) = buried_target();
        let ticket = engine.retrieve("T", &["B".to_string()], "crew", now()).await.unwrap();
        assert_eq!(ticket.retrieval_steps[2].action, RetrievalAction::SetAside);

        engine.confirm_retrieval("T", "crew", now()).await.unwrap();
        let snapshot = repo.snapshot().await.unwrap();
        assert_eq!(snapshot.item("B").unwrap().status, ItemStatus::InTransit);
    }

    #[tokio::test]
    async fn stale_recorded_plan_is_recomputed() {
        let (engine, _) = engine_with(
            vec![container("c1", "Lab")],
            vec![
                cube("T", 50.0).placed_at_start("c1", (0.0, 50.0, 0.0)),
                cube("B", 50.0),
            ],
        );
        let ticket = engine.retrieve("T", &[], "crew", now()).await.unwrap();
        assert_eq!(ticket.retrieval_steps.len(), 1);

        let request = PlaceRequest {
            item_id: "B".into(),
            container_id: "c1".into(),
            position: Position::from_start_and_extent(Vec3::zero(), Vec3::new(50.0, 50.0, 50.0)),
        };
        engine.place(&request, "crew", now()).await.unwrap();

        let confirmation = engine.confirm_retrieval("T", "crew", now()).await.unwrap();
        assert_eq!(confirmation.plan_id, None);
        assert_eq!(confirmation.retrieval_steps.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_confirmations_claim_an_item_once() {
        let (engine, _) = buried_target();
        let engine = Arc::new(engine);
        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.confirm_retrieval("T", "crew-1", now()).await }
        });
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.confirm_retrieval("T", "crew-2", now()).await }
        });
        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn confirmation_losing_every_race_is_a_concurrent_modification() {
        crate::logging::init_test();
        let stowed = || vec![cube("T", 50.0).placed_at_start("c1", (0.0, 0.0, 0.0))];

        let engine = conflicting_with(vec![container("c1", "Lab")], stowed(), 2);
        let confirmation = engine.confirm_retrieval("T", "crew", now()).await.unwrap();
        assert_eq!(confirmation.item.status, ItemStatus::InTransit);

        let engine = conflicting_with(vec![container("c1", "Lab")], stowed(), 3);
        let ticket = engine.retrieve("T", &[], "crew", now()).await.unwrap();
        let err = engine.confirm_retrieval("T", "crew", now()).await.unwrap_err();
        assert_eq!(err, EngineError::ConcurrentModification { attempts: 3 });

        // The recorded plan survives the failed attempt.
        let confirmation = engine.confirm_retrieval("T", "crew", now()).await.unwrap();
        assert_eq!(confirmation.plan_id, Some(ticket.plan_id));
    }

    #[tokio::test]
    async fn item_locks_and_plans_are_released() {
        let (engine, _) = buried_target();
        engine.retrieve("T", &[], "crew", now()).await.unwrap();
        assert_eq!(engine.recorded.lock().await.len(), 1);
        engine.confirm_retrieval("T", "crew", now()).await.unwrap();
        assert_eq!(engine.locks.tracked(), 0);
        assert!(engine.recorded.lock().await.is_empty());

        // Abandoned plan, then the item is moved by hand.
        let (engine, _) = buried_target();
        engine.retrieve("T", &[], "crew", now()).await.unwrap();
        let request = PlaceRequest {
            item_id: "T".into(),
            container_id: "c1".into(),
            position: Position::from_start_and_extent(Vec3::new(50.0, 0.0, 0.0), Vec3::new(50.0, 50.0, 50.0)),
        };
        engine.place(&request, "crew", now()).await.unwrap();
        assert_eq!(engine.locks.tracked(), 0);
        assert!(engine.recorded.lock().await.is_empty());

        // A newer plan replaces the older one.
        let (engine, _) = buried_target();
        engine.retrieve("T", &[], "crew", now()).await.unwrap();
        let newer = engine.retrieve("T", &["B".to_string()], "crew", now()).await.unwrap();
        let recorded = engine.recorded.lock().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded["T"].plan_id, newer.plan_id);
    }

    #[tokio::test]
    async fn discarded_items_drop_their_plans() {
        let expired = cube("old", 10.0)
            .with_expiry(now() - chrono::Duration::days(1))
            .placed_at_start("dock", (0.0, 0.0, 0.0));
        let (engine, _) = engine_with(vec![container("dock", "Airlock")], vec![expired]);
        engine.retrieve("old", &[], "crew", now()).await.unwrap();

        engine.identify_waste("crew", now()).await.unwrap();
        assert!(engine.recorded.lock().await.is_empty());

        engine.retrieve("old", &[], "crew", now()).await.unwrap();
        engine.complete_undocking("dock", "crew", now()).await.unwrap();
        assert!(engine.recorded.lock().await.is_empty());
        assert_eq!(engine.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn place_keeps_a_rotated_orientation() {
        let rotating = EngineConfig {
            placement: PlacementConfig::builder().allow_rotation(true).build(),
            ..fast_config()
        };
        let rod = Item::new("rod", "Rod", (10.0, 20.0, 40.0), 50, "Lab").unwrap();
        let repo = Arc::new(InMemoryRepository::with_data(vec![container("c1", "Lab")], vec![rod.clone()]));
        let engine = Engine::new(repo, rotating);

        let lying = PlaceRequest {
            item_id: "rod".into(),
            container_id: "c1".into(),
            position: Position::from_start_and_extent(Vec3::zero(), Vec3::new(40.0, 10.0, 20.0)),
        };
        let placed = engine.place(&lying, "crew", now()).await.unwrap();
        assert_eq!(placed.position.unwrap().end(), Vec3::new(40.0, 10.0, 20.0));

        // Without rotation the declared orientation wins.
        let (engine, _) = engine_with(vec![container("c1", "Lab")], vec![rod]);
        let placed = engine.place(&lying, "crew", now()).await.unwrap();
        assert_eq!(placed.position.unwrap().end(), Vec3::new(10.0, 20.0, 40.0));
    }

    #[tokio::test]
    async fn reimport_keeps_stowage_state() {
        let kit = Item::new("kit", "Kit", (10.0, 10.0, 10.0), 80, "Lab")
            .unwrap()
            .with_usage_limit(5)
            .placed_at_start("c1", (0.0, 0.0, 0.0));
        let (engine, repo) = engine_with(vec![container("c1", "Lab")], vec![kit]);
        engine.retrieve("kit", &[], "crew", now()).await.unwrap();
        engine.confirm_retrieval("kit", "crew", now()).await.unwrap();

        let summary = engine
            .import_items_csv(
                "Item ID,Name,Width(cm),Depth(cm),Height(cm),Mass(kg),Priority (1-100),Expiry Date (ISO Format),Usage Limit,Preferred Zone
                 kit,Kit v2,10,10,10,1,90,,5,Lab
",
            )
            .await
            .unwrap();
        assert_eq!(summary.imported, 1);

        let report = engine.optimize_placement("crew", now()).await.unwrap();
        assert_eq!(report.placements, 0);

        let snapshot = repo.snapshot().await.unwrap();
        let kit = snapshot.item("kit").unwrap();
        assert_eq!(kit.name, "Kit v2");
        assert_eq!(kit.priority, 90);
        assert_eq!(kit.status, ItemStatus::InTransit);
        assert_eq!(kit.uses_remaining, Some(4));
        assert!(kit.position.is_none());
    }

    #[tokio::test]
    async fn place_derives_end_coordinates() {
        let (engine, _) = engine_with(vec![container("c1", "Lab")], vec![cube("a", 20.0)]);
        let request = PlaceRequest {
            item_id: "a".into(),
            container_id: "c1".into(),
            // Placeholder end corner that matches no orientation.
            position: Position::from_start_and_extent(Vec3::new(5.0, 5.0, 5.0), Vec3::new(10.0, 10.0, 10.0)),
        };
        let placed = engine.place(&request, "crew", now()).await.unwrap();
        let position = placed.position.unwrap();
        assert_eq!(position.end(), Vec3::new(25.0, 25.0, 25.0));
        assert_eq!(placed.status, ItemStatus::Stowed);
    }

    #[tokio::test]
    async fn place_rejects_collisions_and_unknown_containers() {
        let (engine, _) = engine_with(
            vec![container("c1", "Lab")],
            vec![cube("a", 20.0).placed_at_start("c1", (0.0, 0.0, 0.0)), cube("b", 20.0)],
        );
        let colliding = PlaceRequest {
            item_id: "b".into(),
            container_id: "c1".into(),
            position: Position::from_start_and_extent(Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 20.0, 20.0)),
        };
        let err = engine.place(&colliding, "crew", now()).await.unwrap_err();
        assert!(matches!(err, EngineError::PlacementRejected(_)));

        let outside = PlaceRequest {
            position: Position::from_start_and_extent(Vec3::new(90.0, 0.0, 0.0), Vec3::new(20.0, 20.0, 20.0)),
            ..colliding.clone()
        };
        assert!(matches!(
            engine.place(&outside, "crew", now()).await.unwrap_err(),
            EngineError::PlacementRejected(_)
        ));

        let nowhere = PlaceRequest {
            container_id: "ghost".into(),
            ..colliding
        };
        assert!(matches!(
            engine.place(&nowhere, "crew", now()).await.unwrap_err(),
            EngineError::NotFound { entity: "container", .. }
        ));
    }

    #[tokio::test]
    async fn inconsistent_snapshots_are_refused() {
        let (engine, _) = engine_with(
            vec![container("c1", "Lab")],
            vec![
                cube("a", 50.0).placed_at_start("c1", (0.0, 0.0, 0.0)),
                cube("b", 50.0).placed_at_start("c1", (25.0, 0.0, 0.0)),
            ],
        );
        let err = engine.retrieve("a", &[], "crew", now()).await.unwrap_err();
        assert!(matches!(err, EngineError::InconsistentSnapshot(_)));
        assert!(!err.is_fatal());

        let (engine, _) = engine_with(
            vec![container("c1", "Lab")],
            vec![cube("a", 50.0).placed_at_start("gone", (0.0, 0.0, 0.0))],
        );
        let err = engine.optimize_placement("crew", now()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn waste_lifecycle_ends_with_undocking() {
        let expired = cube("old", 10.0)
            .with_mass(3.0)
            .with_expiry(now() - chrono::Duration::days(2))
            .placed_at_start("dock", (0.0, 0.0, 0.0));
        let fresh = cube("fresh", 10.0).placed_at_start("dock", (10.0, 0.0, 0.0));
        let (engine, repo) = engine_with(vec![container("dock", "Airlock")], vec![expired, fresh]);

        let found = engine.identify_waste("crew", now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(engine.identify_waste("crew", now()).await.unwrap().is_empty());

        let request = ReturnPlanRequest {
            undocking_container_id: "dock".into(),
            undocking_date: now(),
            max_weight: 10.0,
        };
        let plan = engine.return_plan(&request, now()).await.unwrap();
        assert_eq!(plan.return_manifest.return_items.len(), 1);
        assert_eq!(plan.return_manifest.total_weight, 3.0);

        let report = engine.complete_undocking("dock", "crew", now()).await.unwrap();
        assert_eq!(report.items_removed, 1);
        let snapshot = repo.snapshot().await.unwrap();
        assert!(snapshot.item("old").is_none());
        assert_eq!(snapshot.item("fresh").unwrap().status, ItemStatus::InTransit);

        let status = engine.system_status().await.unwrap();
        assert_eq!(status, SystemStatus { space_utilization: 0.0, active_items: 1, waste_items: 0 });
    }

    #[tokio::test]
    async fn simulation_commits_usage() {
        let (engine, repo) = engine_with(
            vec![container("c1", "Lab")],
            vec![cube("kit", 10.0).with_usage_limit(1)],
        );
        let request = SimulationRequest {
            num_of_days: Some(2),
            items_to_be_used_per_day: vec![simulation::ItemUsage {
                item_id: Some("kit".into()),
                name: None,
            }],
            ..SimulationRequest::default()
        };
        let report = engine.simulate(&request, now()).await.unwrap();
        assert_eq!(report.changes.total_items_depleted, 1);
        assert!(repo.snapshot().await.unwrap().item("kit").unwrap().is_waste);

        let status = engine.simulation_status(now()).await.unwrap();
        assert_eq!(status.total_items_depleted, 1);

        let err = engine.simulate(&SimulationRequest::default(), now()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let endless = SimulationRequest {
            num_of_days: Some(u32::MAX),
            ..SimulationRequest::default()
        };
        let err = engine.simulate(&endless, now()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn csv_import_feeds_queries_and_export() {
        let (engine, _) = engine_with(Vec::new(), Vec::new());
        assert!(!engine.containers_exist().await.unwrap());

        let summary = engine
            .import_containers_csv("Container ID,Zone,Width(cm),Depth(cm),Height(cm)\ncontA,Lab,100,100,100\n")
            .await
            .unwrap();
        assert_eq!(summary.imported, 1);
        let summary = engine
            .import_items_csv(
                "Item ID,Name,Width(cm),Depth(cm),Height(cm),Mass(kg),Priority (1-100),Expiry Date (ISO Format),Usage Limit,Preferred Zone\n\
                 001,Kit,10,10,10,1,80,,,Lab\n\
                 002,Bad,10,10,10,1,0,,,Lab\n",
            )
            .await
            .unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(engine.items_exist().await.unwrap());

        engine.optimize_placement("crew", now()).await.unwrap();
        assert_eq!(engine.container_items("contA").await.unwrap().len(), 1);
        assert_eq!(engine.container("contA").await.unwrap().zone, "Lab");

        let export = engine.export_arrangement().await.unwrap();
        assert!(export.contains("001,contA,\"(0,0,0),(10,10,10)\""));

        let err = engine.import_containers_csv("Zone\nLab\n").await.unwrap_err();
        assert!(matches!(err, EngineError::Import(_)));
    }

    #[test]
    fn what_if_planning_leaves_no_trace() {
        let (engine, _) = engine_with(Vec::new(), Vec::new());
        let outcome = engine
            .plan_what_if(&[cube("a", 10.0)], &[container("c1", "Lab")])
            .unwrap();
        assert_eq!(outcome.placed_count(), 1);
    }
}
