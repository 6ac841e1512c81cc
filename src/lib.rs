// src/lib.rs
//! Aggregates game-server listings from heterogeneous master servers into a
//! per-game directory, enriched with latency and country labels.

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod geolocation;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod prober;
pub mod storage;
pub mod utils;
