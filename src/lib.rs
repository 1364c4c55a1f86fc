//! Container placement and item-retrieval planning.
//!
//! The planners ([`placement`], [`retrieval`], [`waste`], [`simulation`]) are
//! pure functions over snapshots. The [`engine`] runs them against a
//! [`repository::Repository`] and commits their results atomically; [`api`]
//! exposes the engine over HTTP.

pub mod api;
pub mod config;
pub mod csv_io;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod placement;
pub mod repository;
pub mod retrieval;
pub mod simulation;
pub mod types;
pub mod waste;
