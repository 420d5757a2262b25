//! The central job controller.
//!
//! Split into focused submodules:
//! - `core`: JobController struct, constructor, pools, snapshots and lifecycle
//! - `submission`: submitting jobs, priority routing and registry bookkeeping

mod core;
mod submission;
#[cfg(test)]
mod tests;

pub use self::core::{JobController, JobSnapshot};
