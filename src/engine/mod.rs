//! Pipeline engine.
//!
//! Provides stage orchestration and the run report.

pub mod orchestrator;
pub mod result;
