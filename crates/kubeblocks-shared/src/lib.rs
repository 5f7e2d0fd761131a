//! This crate contains unit-aware parsing helpers used across the other crates in this
//! workspace: Kubernetes resource quantities, storage sizes as written in database
//! configuration files, and human-readable durations.

pub mod quantity;
pub mod time;
