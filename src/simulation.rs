//! Day-by-day time simulation.
//!
//! Advances the clock one day at a time, consuming uses of the requested items
//! and flagging items that run out or expire. The simulation works on a copy
//! of the items and reports the changed records; committing them is left to
//! the caller.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::error::SimulationError;
use crate::model::{ActionType, ActivityEntry, Item};

/// Actor recorded for simulated activity.
pub const SIMULATION_ACTOR: &str = "simulation";

/// Longest run a single request may simulate (about a century).
pub const MAX_SIMULATION_DAYS: u32 = 36_500;

/// Reference to an item used every simulated day.
#[derive(Clone, Debug, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemUsage {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ItemUsage {
    fn matches(&self, item: &Item) -> bool {
        match (&self.item_id, &self.name) {
            (Some(id), _) => *id == item.id,
            (None, Some(name)) => *name == item.name,
            (None, None) => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    #[serde(default)]
    pub num_of_days: Option<u32>,
    #[serde(default)]
    pub to_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items_to_be_used_per_day: Vec<ItemUsage>,
}

impl SimulationRequest {
    /// Number of days to simulate from `now`.
    ///
    /// Partial days towards `toTimestamp` round up. Runs longer than
    /// [`MAX_SIMULATION_DAYS`] are rejected.
    pub fn days(&self, now: DateTime<Utc>) -> Result<u32, SimulationError> {
        let days = match (self.num_of_days, self.to_timestamp) {
            (Some(days), _) => i64::from(days),
            (None, Some(target)) => {
                let span = target - now;
                let whole = span.num_days();
                if span > Duration::days(whole) { whole + 1 } else { whole }
            }
            (None, None) => 0,
        };
        if days <= 0 {
            return Err(SimulationError::NoDays);
        }
        if days > i64::from(MAX_SIMULATION_DAYS) {
            return Err(SimulationError::TooManyDays {
                requested: days,
                max: MAX_SIMULATION_DAYS,
            });
        }
        u32::try_from(days).map_err(|_| SimulationError::TooManyDays {
            requested: days,
            max: MAX_SIMULATION_DAYS,
        })
    }
}

fn day_after(start: DateTime<Utc>, day: u32) -> Result<DateTime<Utc>, SimulationError> {
    start
        .checked_add_signed(Duration::days(i64::from(day)))
        .ok_or_else(|| SimulationError::DateOutOfRange {
            start: start.to_rfc3339(),
            days: day,
        })
}

/// Status of an item touched on a simulated day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub enum DayStatus {
    Active,
    Depleted,
    Expired,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DayEvent {
    pub item_id: String,
    pub name: String,
    pub status: DayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses_remaining: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: DateTime<Utc>,
    pub items: Vec<DayEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationChanges {
    pub daily_reports: Vec<DailyReport>,
    pub total_items_used: usize,
    pub total_items_depleted: usize,
    pub total_items_expired: usize,
}

/// Result of a simulation run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationOutcome {
    pub new_date: DateTime<Utc>,
    pub changes: SimulationChanges,
    /// Items whose state changed, in their final state
    pub updated: Vec<Item>,
    pub log: Vec<ActivityEntry>,
}

/// Runs `days` simulated days starting at `start`.
///
/// Day `n` is dated `start + n days`. Usage is applied before expiry, so an
/// item used on the day it expires still counts the use. Fails without
/// touching anything when the last simulated date is not representable.
pub fn simulate(
    items: &[Item],
    start: DateTime<Utc>,
    days: u32,
    usage: &[ItemUsage],
) -> Result<SimulationOutcome, SimulationError> {
    let new_date = day_after(start, days)?;
    let mut working: Vec<Item> = items.to_vec();
    let mut touched = vec![false; working.len()];
    let mut changes = SimulationChanges::default();
    let mut log = Vec::new();

    for day in 1..=days {
        let date = day_after(start, day)?;
        let mut report = DailyReport {
            date,
            items: Vec::new(),
        };

        for request in usage {
            let Some(idx) = working
                .iter()
                .position(|item| !item.is_waste && request.matches(item))
            else {
                continue;
            };
            let item = &mut working[idx];
            let old_uses = item.uses_remaining;
            if !matches!(old_uses, Some(n) if n > 0) || item.usage_limit.is_none() {
                continue;
            }

            let depleted = item.consume_use();
            touched[idx] = true;
            changes.total_items_used += 1;
            log.push(ActivityEntry::new(
                date,
                SIMULATION_ACTOR,
                ActionType::Retrieval,
                Some(item.id.clone()),
                json!({
                    "simulatedDate": date,
                    "oldUsesRemaining": old_uses,
                    "newUsesRemaining": item.uses_remaining,
                    "simulated": true,
                }),
            ));

            let status = if depleted {
                item.is_waste = true;
                changes.total_items_depleted += 1;
                log.push(ActivityEntry::new(
                    date,
                    SIMULATION_ACTOR,
                    ActionType::Disposal,
                    Some(item.id.clone()),
                    json!({ "reason": "Out of Uses", "simulatedDate": date }),
                ));
                DayStatus::Depleted
            } else {
                DayStatus::Active
            };
            report.items.push(DayEvent {
                item_id: item.id.clone(),
                name: item.name.clone(),
                status,
                uses_remaining: item.uses_remaining,
            });
        }

        for (idx, item) in working.iter_mut().enumerate() {
            if item.is_waste || !item.is_expired(date) {
                continue;
            }
            item.is_waste = true;
            touched[idx] = true;
            changes.total_items_expired += 1;
            log.push(ActivityEntry::new(
                date,
                SIMULATION_ACTOR,
                ActionType::Disposal,
                Some(item.id.clone()),
                json!({ "reason": "Expired", "expiryDate": item.expiry_date, "simulatedDate": date }),
            ));
            report.items.push(DayEvent {
                item_id: item.id.clone(),
                name: item.name.clone(),
                status: DayStatus::Expired,
                uses_remaining: None,
            });
        }

        changes.daily_reports.push(report);
    }

    let updated = working
        .into_iter()
        .zip(touched)
        .filter_map(|(item, changed)| changed.then_some(item))
        .collect();

    Ok(SimulationOutcome {
        new_date,
        changes,
        updated,
        log,
    })
}

/// Aggregate usage counters over the current items.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    pub total_items_used: usize,
    pub total_items_depleted: usize,
    pub total_items_expired: usize,
}

impl SimulationStatus {
    pub fn from_items(items: &[Item], now: DateTime<Utc>) -> Self {
        let mut status = Self::default();
        for item in items {
            if let (Some(limit), Some(remaining)) = (item.usage_limit, item.uses_remaining) {
                if remaining < limit {
                    status.total_items_used += 1;
                }
                if remaining == 0 {
                    status.total_items_depleted += 1;
                }
            }
            if item.is_waste && item.is_expired(now) {
                status.total_items_expired += 1;
            }
        }
        status
    }
}
