//! Fake toolchain
//!
//! Builds "succeed" instantly with a deterministic output path
//! `/nix/store/<target>-<package>`. Every call is recorded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::failure::{FailureConfig, FailureInjector, ToolchainOp};
use crate::toolchain::{BuildOutput, Toolchain, ToolchainError, ToolchainResult};

/// A recorded toolchain call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainCall {
    Build { target: String, package: String },
    Sign { paths: Vec<String>, key_file: PathBuf },
    Copy { paths: Vec<String>, uri: String },
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<ToolchainCall>,
    failures: FailureInjector,
    /// Output path -> (target, package) that produced it
    outputs: HashMap<String, (String, String)>,
}

/// In-process [`Toolchain`] for tests
#[derive(Debug, Default)]
pub struct FakeToolchain {
    inner: Mutex<Inner>,
}

impl FakeToolchain {
    /// Create a toolchain where everything succeeds
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Output path the fake produces for a unit
    pub fn out_path(target: &str, package: &str) -> String {
        format!("/nix/store/{}-{}", target, package)
    }

    /// Fail `op` for the unit (`target`, `package`)
    pub fn fail(&self, op: ToolchainOp, target: &str, package: &str, config: FailureConfig) {
        self.lock().failures.inject(op, target, package, config);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All calls, oldest first
    pub fn calls(&self) -> Vec<ToolchainCall> {
        self.lock().calls.clone()
    }

    /// Build calls as (target, package) pairs
    pub fn builds(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ToolchainCall::Build { target, package } => Some((target, package)),
                _ => None,
            })
            .collect()
    }

    /// Number of build calls
    pub fn build_count(&self) -> usize {
        self.builds().len()
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    fn check_paths(&self, op: ToolchainOp, step: &'static str, paths: &[String]) -> ToolchainResult<()> {
        let mut inner = self.lock();
        let unit = paths.first().and_then(|p| inner.outputs.get(p).cloned());

        if let Some((target, package)) = unit {
            if let Some(message) = inner.failures.check(op, &target, &package) {
                return Err(ToolchainError::Failed {
                    step,
                    status: "exit status: 1".to_string(),
                    stderr: message,
                });
            }
        }
        Ok(())
    }
}

impl Toolchain for FakeToolchain {
    fn build(&self, target: &str, package: &str) -> ToolchainResult<BuildOutput> {
        let mut inner = self.lock();
        inner.calls.push(ToolchainCall::Build {
            target: target.to_string(),
            package: package.to_string(),
        });

        if let Some(message) = inner.failures.check(ToolchainOp::Build, target, package) {
            return Err(ToolchainError::Failed {
                step: "build",
                status: "exit status: 1".to_string(),
                stderr: message,
            });
        }

        let out = Self::out_path(target, package);
        inner
            .outputs
            .insert(out.clone(), (target.to_string(), package.to_string()));
        BuildOutput::new(vec![out])
    }

    fn sign(&self, paths: &[String], key_file: &Path) -> ToolchainResult<()> {
        self.lock().calls.push(ToolchainCall::Sign {
            paths: paths.to_vec(),
            key_file: key_file.to_path_buf(),
        });
        self.check_paths(ToolchainOp::Sign, "sign", paths)
    }

    fn copy_to(&self, paths: &[String], uri: &str) -> ToolchainResult<()> {
        self.lock().calls.push(ToolchainCall::Copy {
            paths: paths.to_vec(),
            uri: uri.to_string(),
        });
        self.check_paths(ToolchainOp::Copy, "copy", paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_records_and_returns_path() {
        let tc = FakeToolchain::new();
        let out = tc.build("abc", "hello").unwrap();
        assert_eq!(out.out_paths, vec!["/nix/store/abc-hello".to_string()]);
        assert_eq!(tc.builds(), vec![("abc".to_string(), "hello".to_string())]);
    }

    #[test]
    fn test_sign_failure_follows_unit() {
        let tc = FakeToolchain::new();
        tc.fail(ToolchainOp::Sign, "abc", "hello", FailureConfig::error("bad key"));

        let out = tc.build("abc", "hello").unwrap();
        let err = tc.sign(&out.out_paths, Path::new("/key")).unwrap_err();
        assert!(matches!(err, ToolchainError::Failed { step: "sign", .. }));

        let other = tc.build("abc", "world").unwrap();
        assert!(tc.sign(&other.out_paths, Path::new("/key")).is_ok());
    }
}
