//! Failure injection for the fake toolchain

use std::collections::HashMap;

/// Toolchain operation a failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolchainOp {
    Build,
    Sign,
    Copy,
}

/// Failure configuration for one operation on one unit
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Message reported on stderr
    pub message: String,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Always fail with `message`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Unit of work a failure is attached to: (operation, target, package)
type FailureKey = (ToolchainOp, String, String);

/// Failure injector keyed by operation and build unit
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<FailureKey, FailureConfig>,
    call_counts: HashMap<FailureKey, u32>,
}

impl FailureInjector {
    /// Create a new failure injector
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for `op` on the unit (`target`, `package`)
    pub fn inject(&mut self, op: ToolchainOp, target: &str, package: &str, config: FailureConfig) {
        let key = (op, target.to_string(), package.to_string());
        self.call_counts.insert(key.clone(), 0);
        self.configs.insert(key, config);
    }

    /// Clear all failure injections
    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// Returns the failure message if this call should fail
    pub fn check(&mut self, op: ToolchainOp, target: &str, package: &str) -> Option<String> {
        let key = (op, target.to_string(), package.to_string());
        let config = self.configs.get(&key)?;

        let count = self.call_counts.entry(key).or_insert(0);
        *count += 1;

        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }

        Some(config.message.clone())
    }
}
