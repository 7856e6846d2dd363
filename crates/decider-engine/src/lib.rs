//! Decision engine for Decider CI.
//!
//! Turns a trigger into a job graph: the dispatch table selects construction
//! functions, the registry deduplicates the jobs they build, and the emitter
//! submits the resulting DAG to an execution backend.

pub mod catalog;
pub mod dag;
pub mod decision;
pub mod deps;
pub mod dispatch;
pub mod emit;
pub mod registry;
pub mod table;

pub use decision::{DecisionEngine, DecisionRun};
pub use dispatch::{DispatchTable, Dispatcher, JobOptions, JobSpec, TriggerSetup};
pub use emit::{EmissionPlan, EmitReport, GraphEmitter, Submission, SubmissionStatus};
pub use registry::{JobHandle, JobRegistry};
