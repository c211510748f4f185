//! Reservation scheduling and approval engine for venue and equipment bookings.
//!
//! [`engine::Engine`] validates drafts, expands date ranges into per-day
//! rows, checks the repository for overlapping bookings and drives the
//! approval workflow. [`calendar`] turns persisted rows into calendar events
//! and keeps them fresh from repository change notifications.

pub mod calendar;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod portal;
pub mod repository;
pub mod store;

pub use engine::{Engine, EngineError};
