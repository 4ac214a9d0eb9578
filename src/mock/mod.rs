//! In-process fakes for the publisher's collaborators
//!
//! - [`FakeToolchain`]: records build/sign/copy calls, fails on demand
//! - [`StaticRefSource`]: serves a fixed list of refs
//! - [`FailureInjector`]: per-operation, per-unit failure injection

mod failure;
mod refs;
mod toolchain;

pub use failure::{FailureConfig, FailureInjector, ToolchainOp};
pub use refs::StaticRefSource;
pub use toolchain::{FakeToolchain, ToolchainCall};
