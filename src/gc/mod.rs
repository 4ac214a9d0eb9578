//! Binary cache garbage collection
//!
//! [`RetentionPolicy`] decides; [`Collector`] walks the bucket and deletes.

mod collector;
mod policy;

pub use collector::{Collector, GcFailure, GcOptions, GcProgress, GcReport, DEFAULT_PROGRESS_EVERY};
pub use policy::{Decision, DropReason, RetentionPolicy, TrustedKey};
