//! Plan data model and file store for planrun
//!
//! A plan is a unit of work with an id, status, priority, dependency edges,
//! and an ordered list of tasks; tasks optionally decompose into steps. Plans
//! live one-per-file as YAML documents. The store reads whole files and
//! replaces them atomically on write; it never patches in place, so external
//! editors (including executing backends) can rewrite a plan between
//! orchestrator iterations.

mod error;
mod model;
mod store;

pub use error::PlanError;
pub use model::{Plan, PlanStatus, Priority, Step, Task};
pub use store::{PlanCollection, PlanFile, PlanStore};
