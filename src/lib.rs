//! Tiermover - Two-tier storage cache manager for completed download items
//!
//! This library migrates finished items from a fast tier ("SSD") to a slow
//! archive tier ("HDD") with copy verification, reclaims fast-tier space by
//! evicting the oldest already-archived items, and coordinates both across
//! short-lived worker processes through a durable on-disk queue and lock
//! records.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod notify;
pub mod queue;
pub mod selector;
pub mod validator;

pub use error::{ManagerError, Result};
