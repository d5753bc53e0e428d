// src/coordinator/mod.rs

//! The coordinating side of a run.
//!
//! A run goes through five stages, each followed by a check of every worker
//! for failures and premature exits:
//!
//! 1. collect each worker's contribution, in registration order
//! 2. merge them into the shared options and broadcast those
//! 3. wait until every worker has signalled readiness
//! 4. release every worker into its run phase
//! 5. wait for the workers to exit, bounded by the runtime timeout
//!
//! Workers are always terminated before [`Coordinator::run`] returns.

pub mod budget;
pub mod builder;
pub mod core;
pub mod isolated;
pub mod merge;

pub use budget::RunBudget;
pub use builder::CoordinatorBuilder;
pub use self::core::Coordinator;
pub use isolated::run_isolated;
pub use merge::merge_contributions;
