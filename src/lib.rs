//! # Swiss Scheduler
//!
//! Swiss-system tournament scheduling: pairing, exactly-once result
//! processing, standings and lifecycle control.
//!
//! ## Architecture
//!
//! - **models**: Core data structures (tournaments, participants, matches, scores)
//! - **engine**: Pairing, standings, completion processing and state transitions
//! - **scheduler**: Per-tournament orchestration and the actor runtime
//! - **storage**: Persistence trait with in-memory and JSONL backends
//! - **config**: Configuration loading and validation

pub mod config;
pub mod engine;
pub mod models;
pub mod scheduler;
pub mod storage;

pub use models::*;
