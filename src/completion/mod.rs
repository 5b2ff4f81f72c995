//! Per-user progress through exercises.
//!
//! [`CompletionTracker`] owns find-or-create of completion records and
//! [`StepEvaluator`] owns the only transition of a step to completed.

pub mod evaluator;
pub mod tracker;

pub use evaluator::{is_satisfied, Evaluation, ObservedResult, Requirement, StepEvaluator};
pub use tracker::{CompletionTracker, OwnedStep};
