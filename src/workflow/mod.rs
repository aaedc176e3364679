//! Upgrade workflow: package selection, the per-package step pipeline and
//! what happens to the recipe repository afterwards.
mod batch;
mod commit;
mod context;
mod steps;

pub use batch::run;
pub(crate) use context::UpgradeContext;
#[cfg(test)]
pub(crate) use context::{PackageRequest, TRANSCRIPT_LOG};
#[cfg(test)]
pub(crate) use steps::{Engine, RunOptions};
