//! Domain-state core for a small business-relationship tracker.
//!
//! The crate keeps leads, customers, deals, tasks and products in
//! memory behind async services, records every change in an activity
//! log, delivers in-app notifications, and enforces a role-based
//! permission matrix. State is persisted as a single JSON snapshot
//! through the [`storage::StateStore`] trait.

pub mod audit;
pub mod config;
pub mod directory;
pub mod fields;
pub mod notify;
pub mod records;
pub mod security;
pub mod shared;
pub mod storage;
