//! Waste identification and undocking return planning.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PlanningError;
use crate::model::{Container, Item, Position, RetrievalStep};
use crate::retrieval::{RetrievalConfig, plan_retrieval};
use crate::types::Dimensional;

/// Why an item became waste.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum WasteReason {
    Expired,
    #[serde(rename = "Out of Uses")]
    OutOfUses,
}

impl WasteReason {
    /// Classifies an item at `now`; expiry wins over depletion.
    pub fn of(item: &Item, now: DateTime<Utc>) -> Option<Self> {
        if item.is_expired(now) {
            Some(WasteReason::Expired)
        } else if item.is_used_up() {
            Some(WasteReason::OutOfUses)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WasteReason::Expired => "Expired",
            WasteReason::OutOfUses => "Out of Uses",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WasteItem {
    pub item_id: String,
    pub name: String,
    pub reason: WasteReason,
    pub container_id: Option<String>,
    pub position: Option<Position>,
}

impl WasteItem {
    fn new(item: &Item, reason: WasteReason) -> Self {
        Self {
            item_id: item.id.clone(),
            name: item.name.clone(),
            reason,
            container_id: item.container_id.clone(),
            position: item.position,
        }
    }
}

/// Items that qualify as waste at `now` but are not flagged yet.
pub fn identify_waste(items: &[Item], now: DateTime<Utc>) -> Vec<WasteItem> {
    items
        .iter()
        .filter(|item| !item.is_waste)
        .filter_map(|item| WasteReason::of(item, now).map(|reason| WasteItem::new(item, reason)))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPlanRequest {
    pub undocking_container_id: String,
    pub undocking_date: DateTime<Utc>,
    pub max_weight: f64,
}

/// One line of the return manifest.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItem {
    pub item_id: String,
    pub name: String,
    pub mass: f64,
    pub volume: f64,
    pub reason: WasteReason,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnManifest {
    pub undocking_container_id: String,
    pub undocking_date: DateTime<Utc>,
    pub return_items: Vec<ReturnItem>,
    pub total_volume: f64,
    pub total_weight: f64,
}

/// Move of a waste item into the undocking container.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnMove {
    pub step: usize,
    pub item_id: String,
    pub item_name: String,
    pub from_container: String,
    pub to_container: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPlan {
    pub return_plan: Vec<ReturnMove>,
    pub retrieval_steps: Vec<RetrievalStep>,
    pub return_manifest: ReturnManifest,
}

/// Orders waste by descending priority, then earliest expiry (none last).
fn return_order(a: &Item, b: &Item) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.expiry_date, b.expiry_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Selects waste for the undocking container and plans how to get it out.
///
/// Items are taken greedily in return order while they fit both the weight
/// budget and the undocking container's volume; an item that does not fit is
/// skipped and later, lighter items are still considered. Retrieval steps are
/// numbered continuously across all selected items, and each item is planned
/// against the container state left behind by the previous ones.
pub fn plan_return(
    items: &[Item],
    containers: &[Container],
    request: &ReturnPlanRequest,
    config: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Result<ReturnPlan, PlanningError> {
    let undocking = containers
        .iter()
        .find(|c| c.id == request.undocking_container_id)
        .ok_or_else(|| PlanningError::UnreachableItem {
            item_id: request.undocking_container_id.clone(),
            reason: "undocking container not found".to_string(),
        })?;
    let volume_budget = undocking.volume();

    let mut waste: Vec<&Item> = items.iter().filter(|item| item.is_waste).collect();
    waste.sort_by(|a, b| return_order(a, b));

    let mut working: Vec<Item> = items.to_vec();
    let mut return_items = Vec::new();
    let mut moves = Vec::new();
    let mut steps: Vec<RetrievalStep> = Vec::new();
    let mut total_volume = 0.0;
    let mut total_weight = 0.0;

    for item in waste {
        let volume = item.volume();
        if total_weight + item.mass > request.max_weight || total_volume + volume > volume_budget {
            continue;
        }

        return_items.push(ReturnItem {
            item_id: item.id.clone(),
            name: item.name.clone(),
            mass: item.mass,
            volume,
            reason: WasteReason::of(item, now).unwrap_or(WasteReason::OutOfUses),
        });
        total_volume += volume;
        total_weight += item.mass;

        let source = match item.container_id.as_deref() {
            Some(id) if id != undocking.id => id,
            _ => continue,
        };
        let Some(container) = containers.iter().find(|c| c.id == source) else {
            continue;
        };

        let plan = plan_retrieval(&item.id, container, &working, &[], config)?;
        let outcome = plan.replay(container, &working, config.epsilon)?;
        working.retain(|other| !other.is_in(source));
        working.extend(outcome.remaining);

        for step in plan.steps {
            steps.push(RetrievalStep {
                step: steps.len() + 1,
                ..step
            });
        }
        moves.push(ReturnMove {
            step: moves.len() + 1,
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            from_container: source.to_string(),
            to_container: undocking.id.clone(),
        });
    }

    Ok(ReturnPlan {
        return_plan: moves,
        retrieval_steps: steps,
        return_manifest: ReturnManifest {
            undocking_container_id: undocking.id.clone(),
            undocking_date: request.undocking_date,
            return_items,
            total_volume,
            total_weight,
        },
    })
}
