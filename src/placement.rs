//! Placement planning for pending items.
//!
//! Assigns each pending item a container and a non-overlapping position using a
//! deterministic first-fit-by-corner heuristic:
//! - items with higher priority are placed first (input order breaks ties)
//! - containers in the item's preferred zone are tried before all others
//! - inside a container, candidate anchor corners are tried in increasing
//!   (height, depth, width) order; every placed box contributes the three
//!   corners adjacent to its max-width, max-depth and max-height faces
//!
//! The planner works on a read snapshot and never mutates shared state.
//! Items that fit nowhere are reported as unplaced, which is a normal outcome.

use std::cmp::Ordering;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::GeometryError;
use crate::geometry::{fits, orientations, overlaps, validate_dimensions, within_bounds};
use crate::model::{Container, Item, PlacementAssignment, PlacementPlan, Position};
use crate::types::{BoundingBox, Dimensional, EPSILON_GENERAL, Vec3};

/// Configuration for the placement planner.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlacementConfig {
    /// Whether items may be placed in any axis permutation of their dimensions
    pub allow_rotation: bool,
    /// Numerical tolerance for fit and overlap tests
    pub epsilon: f64,
}

impl PlacementConfig {
    pub const DEFAULT_ALLOW_ROTATION: bool = false;
    pub const DEFAULT_EPSILON: f64 = EPSILON_GENERAL;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> PlacementConfigBuilder {
        PlacementConfigBuilder::default()
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            allow_rotation: Self::DEFAULT_ALLOW_ROTATION,
            epsilon: Self::DEFAULT_EPSILON,
        }
    }
}

/// Builder for [`PlacementConfig`].
#[derive(Clone, Debug, Default)]
pub struct PlacementConfigBuilder {
    config: PlacementConfig,
}

impl PlacementConfigBuilder {
    /// Enables or disables axis permutations.
    pub fn allow_rotation(mut self, allow: bool) -> Self {
        self.config.allow_rotation = allow;
        self
    }

    /// Sets the numerical tolerance.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    pub fn build(self) -> PlacementConfig {
        self.config
    }
}

/// A container together with the items currently placed in it.
#[derive(Clone, Debug)]
pub struct ContainerSnapshot {
    pub container: Container,
    pub items: Vec<Item>,
}

impl ContainerSnapshot {
    pub fn new(container: Container, items: Vec<Item>) -> Self {
        Self { container, items }
    }

    pub fn empty(container: Container) -> Self {
        Self::new(container, Vec::new())
    }
}

/// Why an item could not be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnplacedReason {
    /// No container is large enough in any permitted orientation.
    DimensionsExceedContainers,
    /// Some container is large enough, but no free anchor fits.
    NoFreeSpace,
}

impl UnplacedReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnplacedReason::DimensionsExceedContainers => "dimensions_exceed_containers",
            UnplacedReason::NoFreeSpace => "no_free_space",
        }
    }
}

impl std::fmt::Display for UnplacedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnplacedReason::DimensionsExceedContainers => {
                write!(f, "Item exceeds every container in at least one dimension")
            }
            UnplacedReason::NoFreeSpace => {
                write!(f, "No free position left in any fitting container")
            }
        }
    }
}

/// Item that could not be placed.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnplacedItem {
    pub item_id: String,
    pub reason: UnplacedReason,
}

/// Share of a container's volume occupied after the run.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerUtilization {
    pub container_id: String,
    /// Percent, rounded to two decimals
    pub percent: f64,
}

/// Result of a planning run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlacementOutcome {
    pub plan: PlacementPlan,
    pub unplaced: Vec<UnplacedItem>,
    pub utilization: Vec<ContainerUtilization>,
}

impl PlacementOutcome {
    /// Whether every pending item received a placement.
    pub fn is_complete(&self) -> bool {
        self.unplaced.is_empty()
    }

    pub fn placed_count(&self) -> usize {
        self.plan.len()
    }

    pub fn unplaced_count(&self) -> usize {
        self.unplaced.len()
    }

    pub fn unplaced_ids(&self) -> Vec<String> {
        self.unplaced.iter().map(|u| u.item_id.clone()).collect()
    }
}

/// Events emitted during planning, e.g. for live streaming.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum PlacementEvent {
    /// An item received a container and position.
    ItemPlaced {
        item_id: String,
        container_id: String,
        position: Position,
    },
    /// An item could not be placed.
    ItemRejected {
        item_id: String,
        reason_code: String,
        reason_text: String,
    },
    /// Planning finished.
    Finished { placed: usize, unplaced: usize },
}

/// Plans placements for `pending` items into `containers`.
///
/// # Parameters
/// * `pending` - Unplaced items, in input order
/// * `containers` - Candidate containers with their current contents
/// * `config` - Planner configuration
pub fn plan_placement(
    pending: &[Item],
    containers: &[ContainerSnapshot],
    config: PlacementConfig,
) -> Result<PlacementOutcome, GeometryError> {
    plan_placement_with_progress(pending, containers, config, |_| {})
}

/// Like [`plan_placement`], with a callback invoked for every planning event.
pub fn plan_placement_with_progress(
    pending: &[Item],
    containers: &[ContainerSnapshot],
    config: PlacementConfig,
    mut on_event: impl FnMut(&PlacementEvent),
) -> Result<PlacementOutcome, GeometryError> {
    for snapshot in containers {
        snapshot.container.validate()?;
    }
    for item in pending {
        validate_dimensions(item.dimensions())?;
    }

    let mut slots = containers
        .iter()
        .map(|snapshot| ContainerSlot::new(snapshot, &config))
        .collect::<Vec<_>>();

    // Higher priority first; sort_by is stable so input order breaks ties.
    let mut order: Vec<&Item> = pending.iter().collect();
    order.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut plan = PlacementPlan::default();
    let mut unplaced = Vec::new();

    for item in order {
        let candidates = candidate_slots(item, &slots, &config)?;

        if candidates.is_empty() {
            reject(
                item,
                UnplacedReason::DimensionsExceedContainers,
                &mut unplaced,
                &mut on_event,
            );
            continue;
        }

        let mut target: Option<(usize, BoundingBox)> = None;
        for idx in candidates {
            if let Some(bbox) = slots[idx].find_position(item, &config) {
                target = Some((idx, bbox));
                break;
            }
        }

        match target {
            Some((idx, bbox)) => {
                slots[idx].occupy(bbox, &config);
                let assignment = PlacementAssignment {
                    item_id: item.id.clone(),
                    container_id: slots[idx].container.id.clone(),
                    position: Position::from_start_and_extent(bbox.min, bbox.dimensions()),
                };
                on_event(&PlacementEvent::ItemPlaced {
                    item_id: assignment.item_id.clone(),
                    container_id: assignment.container_id.clone(),
                    position: assignment.position,
                });
                plan.assignments.push(assignment);
            }
            None => reject(item, UnplacedReason::NoFreeSpace, &mut unplaced, &mut on_event),
        }
    }

    on_event(&PlacementEvent::Finished {
        placed: plan.len(),
        unplaced: unplaced.len(),
    });

    let utilization = slots.iter().map(ContainerSlot::utilization).collect();
    Ok(PlacementOutcome {
        plan,
        unplaced,
        utilization,
    })
}

fn reject(
    item: &Item,
    reason: UnplacedReason,
    unplaced: &mut Vec<UnplacedItem>,
    on_event: &mut impl FnMut(&PlacementEvent),
) {
    on_event(&PlacementEvent::ItemRejected {
        item_id: item.id.clone(),
        reason_code: reason.code().to_string(),
        reason_text: reason.to_string(),
    });
    unplaced.push(UnplacedItem {
        item_id: item.id.clone(),
        reason,
    });
}

/// Indices of containers the item fits into, preferred zone first.
fn candidate_slots(
    item: &Item,
    slots: &[ContainerSlot<'_>],
    config: &PlacementConfig,
) -> Result<Vec<usize>, GeometryError> {
    let mut in_zone = Vec::new();
    let mut elsewhere = Vec::new();
    for (idx, slot) in slots.iter().enumerate() {
        if !fits(item, slot.container, config.allow_rotation, config.epsilon)? {
            continue;
        }
        if slot.container.zone == item.preferred_zone {
            in_zone.push(idx);
        } else {
            elsewhere.push(idx);
        }
    }
    in_zone.extend(elsewhere);
    Ok(in_zone)
}

/// Working state of one container during a run.
struct ContainerSlot<'a> {
    container: &'a Container,
    occupied: Vec<BoundingBox>,
    anchors: Vec<Vec3>,
}

impl<'a> ContainerSlot<'a> {
    fn new(snapshot: &'a ContainerSnapshot, config: &PlacementConfig) -> Self {
        let mut slot = Self {
            container: &snapshot.container,
            occupied: Vec::new(),
            anchors: vec![Vec3::zero()],
        };
        for bbox in snapshot.items.iter().filter_map(Item::placed_box) {
            slot.occupy(bbox, config);
        }
        slot
    }

    /// First free box for the item, scanning anchors in (height, depth, width) order.
    fn find_position(&self, item: &Item, config: &PlacementConfig) -> Option<BoundingBox> {
        let extents = orientations(item.dimensions(), config.allow_rotation, config.epsilon);
        for anchor in &self.anchors {
            for extent in &extents {
                let candidate = BoundingBox::from_position_and_dims(*anchor, *extent);
                if !within_bounds(&candidate, self.container, config.epsilon).unwrap_or(false) {
                    continue;
                }
                if self
                    .occupied
                    .iter()
                    .any(|placed| overlaps(placed, &candidate, config.epsilon))
                {
                    continue;
                }
                return Some(candidate);
            }
        }
        None
    }

    /// Records a placed box and derives new anchor corners from it.
    fn occupy(&mut self, bbox: BoundingBox, config: &PlacementConfig) {
        let eps = config.epsilon;
        self.anchors.retain(|anchor| !anchor.approx_eq(&bbox.min, eps));

        let dims = self.container.dimensions();
        let corners = [
            Vec3::new(bbox.max.x, bbox.min.y, bbox.min.z),
            Vec3::new(bbox.min.x, bbox.max.y, bbox.min.z),
            Vec3::new(bbox.min.x, bbox.min.y, bbox.max.z),
        ];
        for corner in corners {
            let inside = corner.x < dims.x - eps && corner.y < dims.y - eps && corner.z < dims.z - eps;
            if inside {
                insert_anchor(&mut self.anchors, corner, eps);
            }
        }
        self.occupied.push(bbox);
    }

    fn utilization(&self) -> ContainerUtilization {
        let total = self.container.volume();
        let used: f64 = self.occupied.iter().map(BoundingBox::volume).sum();
        let percent = if total <= 0.0 {
            0.0
        } else {
            ((used / total) * 100.0 * 100.0).round() / 100.0
        };
        ContainerUtilization {
            container_id: self.container.id.clone(),
            percent,
        }
    }
}

/// Inserts an anchor keeping the list sorted and free of near-duplicates.
fn insert_anchor(anchors: &mut Vec<Vec3>, point: Vec3, eps: f64) {
    if anchors.iter().any(|a| a.approx_eq(&point, eps)) {
        return;
    }
    let idx = anchors
        .binary_search_by(|probe| compare_anchors(probe, &point))
        .unwrap_or_else(|idx| idx);
    anchors.insert(idx, point);
}

/// Orders anchors by height, then depth, then width.
fn compare_anchors(a: &Vec3, b: &Vec3) -> Ordering {
    a.z.total_cmp(&b.z)
        .then_with(|| a.y.total_cmp(&b.y))
        .then_with(|| a.x.total_cmp(&b.x))
}
