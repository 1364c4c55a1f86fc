//! Retrieval planning.
//!
//! Given a target item and the other items placed in the same container, the
//! planner computes which items block the straight corridor between the target
//! and an open face, the order in which to take them out, and how to restore the
//! container afterwards.
//!
//! Blocking cascades: an item in front of a blocker must leave before that
//! blocker can, so the blocking set is grown to a fixed point over the corridors
//! of every blocker found so far. Removing items nearest to the face first then
//! guarantees every corridor is clear at the moment it is used.

use std::collections::HashMap;

use crate::error::PlanningError;
use crate::geometry::{AccessFace, overlaps, within_bounds};
use crate::model::{Container, Item, Position, RetrievalAction, RetrievalStep};
use crate::types::{BoundingBox, Dimensional, EPSILON_GENERAL, Positioned, Vec3};

/// Configuration for the retrieval planner.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalConfig {
    /// Open faces, in order of preference
    pub faces: Vec<AccessFace>,
    /// Numerical tolerance for corridor tests
    pub epsilon: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            faces: vec![AccessFace::Front],
            epsilon: EPSILON_GENERAL,
        }
    }
}

impl RetrievalConfig {
    pub fn with_faces(mut self, faces: Vec<AccessFace>) -> Self {
        self.faces = faces;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// An ordered retrieval plan for one target item.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalPlan {
    pub target_id: String,
    pub container_id: String,
    /// Face the target leaves through
    pub face: AccessFace,
    pub steps: Vec<RetrievalStep>,
}

/// Container contents after replaying a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayOutcome {
    /// Items still placed in the container, in snapshot order
    pub remaining: Vec<Item>,
    /// Items that left the container: the target and every set-aside item
    pub taken: Vec<String>,
}

impl RetrievalPlan {
    /// Ids of blocking items in removal order.
    pub fn blocker_ids(&self) -> Vec<&str> {
        self.ids_with(RetrievalAction::Remove)
    }

    /// Ids of blockers that will not be put back.
    pub fn set_aside_ids(&self) -> Vec<&str> {
        self.ids_with(RetrievalAction::SetAside)
    }

    fn ids_with(&self, action: RetrievalAction) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.action == action)
            .map(|step| step.item_id.as_str())
            .collect()
    }

    /// Applies the steps to a container snapshot.
    ///
    /// Every `REMOVE` and the `RETRIEVE` step is checked against the items
    /// still present at that point, so a plan whose order would drag an item
    /// through another one is rejected.
    pub fn replay(
        &self,
        container: &Container,
        items: &[Item],
        tolerance: f64,
    ) -> Result<ReplayOutcome, PlanningError> {
        let dims = container.dimensions();
        let mut present: Vec<(String, Position)> = items
            .iter()
            .filter(|item| item.is_in(&container.id))
            .filter_map(|item| item.position.map(|p| (item.id.clone(), p)))
            .collect();
        let mut held: HashMap<String, Position> = HashMap::new();
        let mut taken = Vec::new();

        for step in &self.steps {
            match step.action {
                RetrievalAction::Remove | RetrievalAction::Retrieve => {
                    let idx = present
                        .iter()
                        .position(|(id, _)| *id == step.item_id)
                        .ok_or_else(|| {
                            unreachable(
                                &step.item_id,
                                format!("step {} refers to an item not in the container", step.step),
                            )
                        })?;
                    let bbox = present[idx].1.bounding_box();
                    let corridor = self.face.corridor(&bbox, dims);
                    if let Some((blocker, _)) = present
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != idx)
                        .map(|(_, entry)| entry)
                        .find(|(_, p)| overlaps(&corridor, &p.bounding_box(), tolerance))
                    {
                        return Err(unreachable(
                            &step.item_id,
                            format!("step {} is blocked by {blocker}", step.step),
                        ));
                    }
                    let (id, position) = present.remove(idx);
                    if step.action == RetrievalAction::Retrieve {
                        taken.push(id);
                    } else {
                        held.insert(id, position);
                    }
                }
                RetrievalAction::PlaceBack => {
                    let position = held.remove(&step.item_id).ok_or_else(|| {
                        unreachable(
                            &step.item_id,
                            format!("step {} puts back an item that was never removed", step.step),
                        )
                    })?;
                    present.push((step.item_id.clone(), position));
                }
                RetrievalAction::SetAside => {
                    held.remove(&step.item_id).ok_or_else(|| {
                        unreachable(
                            &step.item_id,
                            format!("step {} sets aside an item that was never removed", step.step),
                        )
                    })?;
                    taken.push(step.item_id.clone());
                }
            }
        }

        let remaining = items
            .iter()
            .filter(|item| item.is_in(&container.id))
            .filter_map(|item| {
                present
                    .iter()
                    .find(|(id, _)| *id == item.id)
                    .map(|(_, position)| {
                        let mut restored = item.clone();
                        restored.position = Some(*position);
                        restored
                    })
            })
            .collect();

        Ok(ReplayOutcome { remaining, taken })
    }
}

fn unreachable(item_id: &str, reason: impl Into<String>) -> PlanningError {
    PlanningError::UnreachableItem {
        item_id: item_id.to_string(),
        reason: reason.into(),
    }
}

/// Computes the retrieval plan for `target_id` inside `container`.
///
/// `items` may contain items of other containers; they are ignored. Blockers
/// listed in `set_aside` end the plan with `SETASIDE` instead of `PLACEBACK`.
///
/// # Errors
/// [`PlanningError::UnreachableItem`] when the target is not placed in the
/// container, lies outside it, overlaps another item, or no face is open.
pub fn plan_retrieval(
    target_id: &str,
    container: &Container,
    items: &[Item],
    set_aside: &[String],
    config: &RetrievalConfig,
) -> Result<RetrievalPlan, PlanningError> {
    container.validate()?;
    let eps = config.epsilon;
    let dims = container.dimensions();

    let target = items
        .iter()
        .find(|item| item.id == target_id && item.is_in(&container.id))
        .ok_or_else(|| unreachable(target_id, format!("not placed in container {}", container.id)))?;
    let target_box = target.bounding_box();

    if !within_bounds(&target_box, container, eps)? {
        return Err(unreachable(target_id, "position lies outside its container"));
    }

    let others: Vec<(&Item, BoundingBox)> = items
        .iter()
        .filter(|item| item.id != target_id && item.is_in(&container.id))
        .filter_map(|item| item.placed_box().map(|bbox| (item, bbox)))
        .collect();

    if let Some((clash, _)) = others
        .iter()
        .find(|(_, bbox)| overlaps(&target_box, bbox, eps))
    {
        return Err(unreachable(
            target_id,
            format!("container data is inconsistent: overlaps {}", clash.id),
        ));
    }

    let mut best: Option<(AccessFace, Vec<usize>)> = None;
    for &face in &config.faces {
        let blockers = blocking_set(&target_box, &others, face, dims, eps);
        let better = best
            .as_ref()
            .is_none_or(|(_, current)| blockers.len() < current.len());
        if better {
            best = Some((face, blockers));
        }
    }
    let (face, mut blockers) =
        best.ok_or_else(|| unreachable(target_id, "no open face configured"))?;

    blockers.sort_by(|&a, &b| {
        let (item_a, box_a) = &others[a];
        let (item_b, box_b) = &others[b];
        face.distance(box_a, dims)
            .total_cmp(&face.distance(box_b, dims))
            .then_with(|| box_b.min.z.total_cmp(&box_a.min.z))
            .then_with(|| item_a.id.cmp(&item_b.id))
    });

    let mut steps = Vec::with_capacity(blockers.len() * 2 + 1);
    let mut push = |action: RetrievalAction, item: &Item| {
        steps.push(RetrievalStep {
            step: steps.len() + 1,
            action,
            item_id: item.id.clone(),
            item_name: item.name.clone(),
        });
    };

    for &idx in &blockers {
        push(RetrievalAction::Remove, others[idx].0);
    }
    push(RetrievalAction::Retrieve, target);
    for &idx in blockers.iter().rev() {
        let item = others[idx].0;
        let action = if set_aside.iter().any(|id| *id == item.id) {
            RetrievalAction::SetAside
        } else {
            RetrievalAction::PlaceBack
        };
        push(action, item);
    }

    Ok(RetrievalPlan {
        target_id: target.id.clone(),
        container_id: container.id.clone(),
        face,
        steps,
    })
}

/// Indices into `others` of every item that must leave before the target can.
fn blocking_set(
    target: &BoundingBox,
    others: &[(&Item, BoundingBox)],
    face: AccessFace,
    container_dims: Vec3,
    tolerance: f64,
) -> Vec<usize> {
    let mut corridors = vec![face.corridor(target, container_dims)];
    let mut blocked: Vec<usize> = Vec::new();
    let mut changed = true;
    while changed {
        changed = false;
        for (idx, (_, bbox)) in others.iter().enumerate() {
            if blocked.contains(&idx) {
                continue;
            }
            if corridors.iter().any(|c| overlaps(c, bbox, tolerance)) {
                blocked.push(idx);
                corridors.push(face.corridor(bbox, container_dims));
                changed = true;
            }
        }
    }
    blocked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Container {
        Container::new("c1", "Lab", (100.0, 100.0, 100.0)).unwrap()
    }

    fn placed(id: &str, dims: (f64, f64, f64), start: (f64, f64, f64)) -> Item {
        Item::new(id, format!("Item {id}"), dims, 50, "Lab")
            .unwrap()
            .placed_at_start("c1", start)
    }

    fn actions(plan: &RetrievalPlan) -> Vec<(RetrievalAction, &str)> {
        plan.steps
            .iter()
            .map(|s| (s.action, s.item_id.as_str()))
            .collect()
    }

    fn assert_well_formed(plan: &RetrievalPlan) {
        let blockers = plan.blocker_ids().len();
        let restores = plan
            .steps
            .iter()
            .filter(|s| matches!(s.action, RetrievalAction::PlaceBack | RetrievalAction::SetAside))
            .count();
        assert_eq!(plan.steps.len(), blockers + 1 + restores);
        for (idx, step) in plan.steps.iter().enumerate() {
            assert_eq!(step.step, idx + 1);
        }
    }

    #[test]
    fn blocker_is_removed_then_put_back() {
        let items = vec![
            placed("T", (50.0, 50.0, 50.0), (0.0, 50.0, 0.0)),
            placed("B", (50.0, 50.0, 50.0), (0.0, 0.0, 0.0)),
        ];
        let plan = plan_retrieval("T", &container(), &items, &[], &RetrievalConfig::default()).unwrap();

        use RetrievalAction::*;
        assert_eq!(actions(&plan), vec![(Remove, "B"), (Retrieve, "T"), (PlaceBack, "B")]);
        assert_eq!(plan.steps[0].item_name, "Item B");
        assert_eq!(plan.face, AccessFace::Front);
        assert_well_formed(&plan);
    }

    #[test]
    fn item_at_the_opening_needs_a_single_step() {
        let items = vec![
            placed("T", (20.0, 20.0, 20.0), (0.0, 0.0, 0.0)),
            placed("behind", (20.0, 20.0, 20.0), (0.0, 20.0, 0.0)),
            placed("beside", (20.0, 20.0, 20.0), (20.0, 0.0, 0.0)),
        ];
        let plan = plan_retrieval("T", &container(), &items, &[], &RetrievalConfig::default()).unwrap();
        assert_eq!(actions(&plan), vec![(RetrievalAction::Retrieve, "T")]);
    }

    #[test]
    fn blocking_cascades_through_items_in_front() {
        let items = vec![
            placed("T", (20.0, 20.0, 10.0), (0.0, 60.0, 0.0)),
            // Overlaps the target's corridor on width 10..20.
            placed("B1", (30.0, 20.0, 10.0), (10.0, 30.0, 0.0)),
            // Only in front of B1, outside the target's cross-section.
            placed("B2", (20.0, 20.0, 10.0), (30.0, 0.0, 0.0)),
            placed("clear", (20.0, 20.0, 10.0), (60.0, 0.0, 0.0)),
        ];
        let plan = plan_retrieval("T", &container(), &items, &[], &RetrievalConfig::default()).unwrap();

        use RetrievalAction::*;
        assert_eq!(
            actions(&plan),
            vec![
                (Remove, "B2"),
                (Remove, "B1"),
                (Retrieve, "T"),
                (PlaceBack, "B1"),
                (PlaceBack, "B2"),
            ]
        );
        assert_well_formed(&plan);
    }

    #[test]
    fn upper_items_leave_before_lower_ones_in_the_same_row() {
        let items = vec![
            placed("T", (20.0, 20.0, 20.0), (0.0, 20.0, 0.0)),
            placed("low", (20.0, 20.0, 10.0), (0.0, 0.0, 0.0)),
            placed("high", (20.0, 20.0, 10.0), (0.0, 0.0, 10.0)),
        ];
        let plan = plan_retrieval("T", &container(), &items, &[], &RetrievalConfig::default()).unwrap();
        assert_eq!(plan.blocker_ids(), vec!["high", "low"]);
        assert_eq!(plan.steps[3].item_id, "low");
        assert_eq!(plan.steps[4].item_id, "high");
    }

    #[test]
    fn requested_blockers_are_set_aside() {
        let items = vec![
            placed("T", (50.0, 50.0, 50.0), (0.0, 50.0, 0.0)),
            placed("B", (50.0, 50.0, 50.0), (0.0, 0.0, 0.0)),
        ];
        let set_aside = vec!["B".to_string()];
        let plan = plan_retrieval("T", &container(), &items, &set_aside, &RetrievalConfig::default()).unwrap();

        use RetrievalAction::*;
        assert_eq!(actions(&plan), vec![(Remove, "B"), (Retrieve, "T"), (SetAside, "B")]);
        assert_eq!(plan.set_aside_ids(), vec!["B"]);
        assert_well_formed(&plan);
    }

    #[test]
    fn fewest_blockers_decides_between_faces() {
        let items = vec![
            placed("T", (20.0, 20.0, 20.0), (0.0, 40.0, 0.0)),
            placed("front", (20.0, 20.0, 20.0), (0.0, 0.0, 0.0)),
        ];
        let config = RetrievalConfig::default().with_faces(vec![AccessFace::Front, AccessFace::Top]);
        let plan = plan_retrieval("T", &container(), &items, &[], &config).unwrap();
        assert_eq!(plan.face, AccessFace::Top);
        assert_eq!(plan.steps.len(), 1);

        // Equal counts keep the configured order.
        let config = RetrievalConfig::default().with_faces(vec![AccessFace::Back, AccessFace::Top]);
        let plan = plan_retrieval("T", &container(), &items, &[], &config).unwrap();
        assert_eq!(plan.face, AccessFace::Back);
    }

    #[test]
    fn unreachable_targets_are_reported() {
        let config = RetrievalConfig::default();
        let loose = Item::new("loose", "Loose", (10.0, 10.0, 10.0), 1, "Lab").unwrap();
        let err = plan_retrieval("loose", &container(), &[loose], &[], &config).unwrap_err();
        assert!(matches!(err, PlanningError::UnreachableItem { ref item_id, .. } if item_id == "loose"));

        let outside = placed("out", (50.0, 50.0, 50.0), (80.0, 0.0, 0.0));
        assert!(plan_retrieval("out", &container(), &[outside], &[], &config).is_err());

        let clash = vec![
            placed("T", (50.0, 50.0, 50.0), (0.0, 0.0, 0.0)),
            placed("X", (50.0, 50.0, 50.0), (25.0, 25.0, 0.0)),
        ];
        let err = plan_retrieval("T", &container(), &clash, &[], &config).unwrap_err();
        assert!(matches!(err, PlanningError::UnreachableItem { ref reason, .. } if reason.contains("X")));

        let no_faces = RetrievalConfig::default().with_faces(Vec::new());
        let lone = placed("T", (10.0, 10.0, 10.0), (0.0, 0.0, 0.0));
        assert!(plan_retrieval("T", &container(), &[lone], &[], &no_faces).is_err());
    }

    #[test]
    fn replay_restores_every_item_but_the_target() {
        let items = vec![
            placed("T", (20.0, 20.0, 10.0), (0.0, 60.0, 0.0)),
            placed("B1", (30.0, 20.0, 10.0), (10.0, 30.0, 0.0)),
            placed("B2", (20.0, 20.0, 10.0), (30.0, 0.0, 0.0)),
            placed("clear", (20.0, 20.0, 10.0), (60.0, 0.0, 0.0)),
        ];
        let plan = plan_retrieval("T", &container(), &items, &[], &RetrievalConfig::default()).unwrap();
        let outcome = plan.replay(&container(), &items, EPSILON_GENERAL).unwrap();

        assert_eq!(outcome.taken, vec!["T".to_string()]);
        let expected: Vec<Item> = items.iter().filter(|i| i.id != "T").cloned().collect();
        assert_eq!(outcome.remaining, expected);
    }

    #[test]
    fn replay_keeps_set_aside_items_out() {
        let items = vec![
            placed("T", (50.0, 50.0, 50.0), (0.0, 50.0, 0.0)),
            placed("B", (50.0, 50.0, 50.0), (0.0, 0.0, 0.0)),
        ];
        let plan = plan_retrieval("T", &container(), &items, &["B".to_string()], &RetrievalConfig::default())
            .unwrap();
        let outcome = plan.replay(&container(), &items, EPSILON_GENERAL).unwrap();
        assert_eq!(outcome.taken, vec!["T".to_string(), "B".to_string()]);
        assert!(outcome.remaining.is_empty());
    }

    #[test]
    fn replay_rejects_out_of_order_removal() {
        let items = vec![
            placed("T", (50.0, 50.0, 50.0), (0.0, 50.0, 0.0)),
            placed("B", (50.0, 50.0, 50.0), (0.0, 0.0, 0.0)),
        ];
        let mut plan = plan_retrieval("T", &container(), &items, &[], &RetrievalConfig::default()).unwrap();
        plan.steps.swap(0, 1);
        assert!(plan.replay(&container(), &items, EPSILON_GENERAL).is_err());
    }
}
