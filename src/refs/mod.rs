//! Ref discovery
//!
//! A [`Ref`] is a name plus the immutable revision it resolves to. Where the
//! refs come from is behind [`RefSource`]; production uses a throwaway git
//! clone ([`GitCheckout`]), tests use [`crate::mock::StaticRefSource`].

mod filter;
mod git;

pub use filter::RefFilter;
pub use git::{GitCheckout, GitError};

use serde::{Deserialize, Serialize};

/// A resolved ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ref {
    /// Fully qualified name, e.g. `refs/heads/main`
    pub name: String,

    /// Commit id the ref resolves to
    pub target: String,
}

impl Ref {
    /// Create a ref.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }
}

/// Anything that can enumerate refs.
pub trait RefSource {
    /// All refs, resolved to their targets.
    fn refs(&self) -> Result<Vec<Ref>, GitError>;
}
