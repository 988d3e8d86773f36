//! Heuristic check for questions lifted from a graded assignment.
//!
//! The question embedding is compared against the assignment namespace and
//! the course materials namespace. A question is flagged when it matches the
//! assignment closely and more closely than it matches the materials.

pub mod estimator;

pub use estimator::{decide, GuardOptions, PlagiarismEstimator};
