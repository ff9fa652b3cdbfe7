//! Skywatch Deterministic Simulation Harness
//!
//! This crate builds complete seeded missions around `skywatch_core` and
//! checks them against the fleet's safety invariants.
//!
//! # Core Principle: One Seed
//!
//! All entropy derives from `MissionConfig::seed`:
//! - **Terrain**: forests, lakes and rivers from `seed * 0x9e3779b97f4a7c15`
//! - **Ground truth**: base and hazard placement from `seed * 0x517cc1b727220a95`
//! - **Evolution**: hazard escalation and spread from the seed itself
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                       │
//! │   setup ──► SimWorld ──► tick loop ──► verify           │
//! │                │             │                          │
//! │           ┌────▼────┐   ┌────▼─────┐                    │
//! │           │ Oracle  │   │ Mission  │ (skywatch_core)    │
//! │           └─────────┘   └────┬─────┘                    │
//! │                              ▼                          │
//! │                         SimExport (JSON)                │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use skywatch_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Baseline);
//! assert!(result.passed);
//! ```

mod exporter;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use exporter::{run_id_for, HazardFrame, SimExport, SimFrame};
pub use oracle::{HazardSeed, Oracle};
pub use runner::{check_energy_safety, ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{BasePlacement, Compass, SimConfig, SimError, SimWorld};
