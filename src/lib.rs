//! cabinshare: membership backfill tooling for co-owned cottages.
//!
//! Owners hold shares in properties through owner profiles; access control is
//! granted per (user, property) through membership records. This crate
//! reconciles owner profiles with identity-provider accounts: a pure planner
//! computes the operations, a sled-backed applier performs them in one
//! transaction, and the `backfill` binary drives the dry-run/apply workflow.

pub mod models;
// Pure reconciliation planner; no I/O, deterministic output
pub mod backfill;
// Sled-backed records, snapshot loading, and the transactional applier
pub mod storage;
