//! # Project workflow core
//!
//! Multi-department project execution: a project is split into ordered
//! levels, each owned by one department/user pair, and work only moves
//! forward once every task at the current level is complete.  When the last
//! task is done a single verification task is created for a verifier picked
//! from a rotating, department-scoped pool, and completing it settles the
//! verifier's incentives.
//!
//! | Concern               | Module                          |
//! |-----------------------|---------------------------------|
//! | Project phase / levels | [`lifecycle`]                  |
//! | Verification task     | [`verification`]                |
//! | Verifier selection    | [`rotation`]                    |
//! | Incentive settlement  | [`settlement`]                  |
//! | Entry points          | [`workflow`], [`envelope`]      |
//! | Storage               | [`store`] (interfaces), [`db`]  |
//! | Outbox replay         | [`worker`]                      |

pub mod config;
pub mod db;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod locks;
pub mod model;
pub mod notify;
pub mod rotation;
pub mod settlement;
pub mod store;
pub mod verification;
pub mod worker;
pub mod workflow;

#[cfg(test)]
mod test_levels;
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod test_verification;

pub use config::{Config, RotationScope};
pub use errors::{Result, WorkflowError};
pub use lifecycle::{AdvanceOutcome, ProjectPhase};
pub use model::{Actor, Role, TaskStatus};
pub use workflow::{Collaborators, Continuation, Workflow};
