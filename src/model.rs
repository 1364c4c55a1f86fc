//! Data models for containers, stowed items and planner output.
//!
//! This module defines the records the repository stores and the planners
//! exchange:
//! - `Container`: a storage volume inside a zone
//! - `Item`: something stowed (or waiting to be stowed) in a container
//! - `Position`: start/end coordinates of a placed item
//! - `RetrievalStep` / `PlacementPlan`: planner output
//! - `ActivityEntry`: audit log record

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::GeometryError;
use crate::geometry::{validate_coordinates, validate_dimensions};
use crate::types::{BoundingBox, Dimensional, Positioned, Vec3};

/// A (width, depth, height) triple as exchanged with clients.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub width: f64,
    pub depth: f64,
    pub height: f64,
}

impl Coordinates {
    pub const fn new(width: f64, depth: f64, height: f64) -> Self {
        Self {
            width,
            depth,
            height,
        }
    }
}

impl From<Vec3> for Coordinates {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Coordinates> for Vec3 {
    fn from(c: Coordinates) -> Self {
        Vec3::new(c.width, c.depth, c.height)
    }
}

/// Location of a placed item inside its container.
///
/// `end_coordinates` is always `start_coordinates` plus the placed extent of
/// the item; constructors derive it rather than accepting it independently.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub start_coordinates: Coordinates,
    pub end_coordinates: Coordinates,
}

impl Position {
    /// Builds a position from its start corner and the placed extent.
    pub fn from_start_and_extent(start: Vec3, extent: Vec3) -> Self {
        Self {
            start_coordinates: start.into(),
            end_coordinates: (start + extent).into(),
        }
    }

    #[inline]
    pub fn start(&self) -> Vec3 {
        self.start_coordinates.into()
    }

    #[inline]
    pub fn end(&self) -> Vec3 {
        self.end_coordinates.into()
    }

    /// Placed extent (`end - start`).
    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.end() - self.start()
    }

    #[inline]
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(self.start(), self.end())
    }

    /// Checks that the start corner is non-negative and the box is not inverted.
    pub fn validate(&self) -> Result<(), GeometryError> {
        validate_coordinates(self.start())?;
        let extent = self.extent();
        if extent.x < 0.0 || extent.y < 0.0 || extent.z < 0.0 {
            return Err(GeometryError::InvertedPosition);
        }
        validate_dimensions(extent)
    }
}

/// Represents a storage container.
///
/// Dimensions are fixed at creation and validated to be positive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(alias = "containerId")]
    pub id: String,
    pub zone: String,
    pub width: f64,
    pub depth: f64,
    pub height: f64,
}

impl Container {
    /// Creates a new container with validation.
    ///
    /// # Examples
    /// ```
    /// use stowage::model::Container;
    ///
    /// assert!(Container::new("contA", "Crew Quarters", (100.0, 85.0, 200.0)).is_ok());
    /// assert!(Container::new("contB", "Airlock", (100.0, 0.0, 200.0)).is_err());
    /// ```
    pub fn new(
        id: impl Into<String>,
        zone: impl Into<String>,
        dims: (f64, f64, f64),
    ) -> Result<Self, GeometryError> {
        let container = Self {
            id: id.into(),
            zone: zone.into(),
            width: dims.0,
            depth: dims.1,
            height: dims.2,
        };
        container.validate()?;
        Ok(container)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        validate_dimensions(self.dimensions())
    }
}

impl Dimensional for Container {
    fn dimensions(&self) -> Vec3 {
        Vec3::new(self.width, self.depth, self.height)
    }
}

/// Lifecycle state of an item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Never placed, waiting for the placement planner.
    #[default]
    Pending,
    /// Anchored in a container at a position.
    Stowed,
    /// Taken out by a confirmed retrieval; re-anchored by an explicit place.
    InTransit,
}

/// Represents a stowable item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "itemId")]
    pub id: String,
    pub name: String,
    pub width: f64,
    pub depth: f64,
    pub height: f64,
    #[serde(default)]
    pub mass: f64,
    pub priority: i32,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub uses_remaining: Option<u32>,
    #[serde(default)]
    pub preferred_zone: String,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub is_waste: bool,
}

impl Item {
    /// Creates a new, unplaced item with validation.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dims: (f64, f64, f64),
        priority: i32,
        preferred_zone: impl Into<String>,
    ) -> Result<Self, GeometryError> {
        let item = Self {
            id: id.into(),
            name: name.into(),
            width: dims.0,
            depth: dims.1,
            height: dims.2,
            mass: 0.0,
            priority,
            expiry_date: None,
            usage_limit: None,
            uses_remaining: None,
            preferred_zone: preferred_zone.into(),
            container_id: None,
            position: None,
            status: ItemStatus::Pending,
            is_waste: false,
        };
        item.validate()?;
        Ok(item)
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_date = Some(expiry);
        self
    }

    /// Sets the usage limit and resets the remaining uses to it.
    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self.uses_remaining = Some(limit);
        self
    }

    /// Anchors the item at `position` inside `container_id`.
    pub fn placed_at(mut self, container_id: impl Into<String>, position: Position) -> Self {
        self.container_id = Some(container_id.into());
        self.position = Some(position);
        self.status = ItemStatus::Stowed;
        self
    }

    /// Shorthand for placing the item in its declared orientation at `start`.
    pub fn placed_at_start(self, container_id: impl Into<String>, start: (f64, f64, f64)) -> Self {
        let position = Position::from_start_and_extent(Vec3::from(start), self.dimensions());
        self.placed_at(container_id, position)
    }

    /// Takes the item out of its container.
    pub fn unanchor(&mut self) {
        self.container_id = None;
        self.position = None;
        self.status = ItemStatus::InTransit;
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        validate_dimensions(self.dimensions())?;
        if let Some(position) = &self.position {
            position.validate()?;
        }
        Ok(())
    }

    /// True when the item has both a container and a position.
    pub fn is_placed(&self) -> bool {
        self.container_id.is_some() && self.position.is_some()
    }

    /// True when the item is placed in the given container.
    pub fn is_in(&self, container_id: &str) -> bool {
        self.position.is_some() && self.container_id.as_deref() == Some(container_id)
    }

    /// Occupied box, if placed.
    pub fn placed_box(&self) -> Option<BoundingBox> {
        self.position.map(|p| p.bounding_box())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_used_up(&self) -> bool {
        self.usage_limit.is_some() && self.uses_remaining == Some(0)
    }

    /// Consumes one use. Returns true when this use depleted the item.
    pub fn consume_use(&mut self) -> bool {
        match (self.usage_limit, self.uses_remaining) {
            (Some(_), Some(remaining)) if remaining > 0 => {
                self.uses_remaining = Some(remaining - 1);
                remaining == 1
            }
            _ => false,
        }
    }
}

impl Dimensional for Item {
    fn dimensions(&self) -> Vec3 {
        Vec3::new(self.width, self.depth, self.height)
    }
}

/// Items are positioned only once placed; unplaced items report a
/// zero-sized box at the origin.
impl Positioned for Item {
    fn bounding_box(&self) -> BoundingBox {
        self.placed_box()
            .unwrap_or_else(|| BoundingBox::new(Vec3::zero(), Vec3::zero()))
    }
}

/// Kind of a retrieval step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetrievalAction {
    Remove,
    SetAside,
    Retrieve,
    PlaceBack,
}

impl fmt::Display for RetrievalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RetrievalAction::Remove => "REMOVE",
            RetrievalAction::SetAside => "SETASIDE",
            RetrievalAction::Retrieve => "RETRIEVE",
            RetrievalAction::PlaceBack => "PLACEBACK",
        };
        f.write_str(label)
    }
}

/// One step of a retrieval plan. Steps are numbered from 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalStep {
    pub step: usize,
    pub action: RetrievalAction,
    pub item_id: String,
    pub item_name: String,
}

/// A chosen container and position for one item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementAssignment {
    pub item_id: String,
    pub container_id: String,
    pub position: Position,
}

/// Placements produced by one optimisation run, in placement order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct PlacementPlan {
    pub assignments: Vec<PlacementAssignment>,
}

impl PlacementPlan {
    pub fn get(&self, item_id: &str) -> Option<&PlacementAssignment> {
        self.assignments.iter().find(|a| a.item_id == item_id)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Activity log categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Placement,
    Retrieval,
    RetrievalInitiated,
    Rearrangement,
    Disposal,
    Search,
}

/// One audit log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action_type: ActionType,
    pub item_id: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
}

impl ActivityEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        user_id: impl Into<String>,
        action_type: ActionType,
        item_id: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            timestamp,
            user_id: user_id.into(),
            action_type,
            item_id,
            details,
        }
    }
}
