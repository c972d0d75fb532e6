//! Mock collaborators for pipeline tests.
//!
//! Every mock records how it was called so tests can assert on the wiring
//! of the test command, not just on its output.

pub mod schemas;

pub use collaborators::*;
pub use schemas::*;
