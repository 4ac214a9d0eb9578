//! Fixed ref source

use std::sync::Mutex;

use crate::refs::{GitError, Ref, RefSource};

/// Serves the refs it was built with. Refs can be replaced between runs to
/// simulate pushes.
#[derive(Debug, Default)]
pub struct StaticRefSource {
    refs: Mutex<Vec<Ref>>,
}

impl StaticRefSource {
    /// Source serving `refs`.
    pub fn new(refs: Vec<Ref>) -> Self {
        Self {
            refs: Mutex::new(refs),
        }
    }

    /// Replace the served refs.
    pub fn set(&self, refs: Vec<Ref>) {
        if let Ok(mut current) = self.refs.lock() {
            *current = refs;
        }
    }
}

impl RefSource for StaticRefSource {
    fn refs(&self) -> Result<Vec<Ref>, GitError> {
        Ok(self.refs.lock().map(|r| r.clone()).unwrap_or_default())
    }
}
