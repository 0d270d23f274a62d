//! # fwa-cli — Firmware Attestation Command-Line Interface
//!
//! ## Subcommands
//!
//! - `fwa analyze JOB`: run an analyze job from a JSON job file
//! - `fwa store put|get|find`: durable store access
//! - `fwa reconcile`: repair images whose upload never completed
//!
//! Argument parsing lives in the subcommand modules; the work is delegated
//! to the domain crates.

pub mod analyze;
pub mod context;
pub mod reconcile;
pub mod store;
