//! Build, sign and upload capability
//!
//! The publisher never runs processes itself; it goes through [`Toolchain`].
//! [`NixToolchain`] drives the `nix` CLI against a local clone. Tests use
//! [`crate::mock::FakeToolchain`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Maximum number of stderr bytes kept in an error.
const STDERR_TAIL_BYTES: usize = 4096;

/// Toolchain errors
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed ({status}): {stderr}")]
    Failed {
        step: &'static str,
        status: String,
        stderr: String,
    },

    #[error("build produced no output paths")]
    NoOutputs,
}

/// Result type for toolchain operations
pub type ToolchainResult<T> = Result<T, ToolchainError>;

/// Output of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Store paths of every output of the package (at least one)
    pub out_paths: Vec<String>,
}

impl BuildOutput {
    /// Wrap a non-empty list of output paths.
    pub fn new(out_paths: Vec<String>) -> ToolchainResult<Self> {
        if out_paths.is_empty() {
            return Err(ToolchainError::NoOutputs);
        }
        Ok(Self { out_paths })
    }
}

/// The three operations the publisher needs.
pub trait Toolchain {
    /// Build `package` at revision `target`.
    fn build(&self, target: &str, package: &str) -> ToolchainResult<BuildOutput>;

    /// Sign `paths` and everything they depend on.
    fn sign(&self, paths: &[String], key_file: &Path) -> ToolchainResult<()>;

    /// Copy `paths` (with their closure) to the cache at `uri`.
    fn copy_to(&self, paths: &[String], uri: &str) -> ToolchainResult<()>;
}

/// `nix` CLI toolchain building from a local checkout.
#[derive(Debug, Clone)]
pub struct NixToolchain {
    repo_dir: PathBuf,
    program: String,
}

impl NixToolchain {
    /// Toolchain building flakes from `repo_dir`.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            program: "nix".to_string(),
        }
    }

    /// Use a different `nix` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Flake reference for `package` at `target`.
    pub fn flake_ref(&self, target: &str, package: &str) -> String {
        format!(
            "git+file://{}?rev={}#{}",
            self.repo_dir.display(),
            target,
            package
        )
    }

    fn run(&self, step: &'static str, args: &[String]) -> ToolchainResult<String> {
        debug!(step, program = %self.program, ?args, "Running toolchain step");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ToolchainError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolchainError::Failed {
                step,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Toolchain for NixToolchain {
    fn build(&self, target: &str, package: &str) -> ToolchainResult<BuildOutput> {
        let args = vec![
            "build".to_string(),
            "--no-use-registries".to_string(),
            "--print-out-paths".to_string(),
            "--no-link".to_string(),
            self.flake_ref(target, package),
        ];
        let stdout = self.run("build", &args)?;

        BuildOutput::new(
            stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    fn sign(&self, paths: &[String], key_file: &Path) -> ToolchainResult<()> {
        let mut args = vec![
            "store".to_string(),
            "sign".to_string(),
            "--recursive".to_string(),
            "--key-file".to_string(),
            key_file.display().to_string(),
        ];
        args.extend(paths.iter().cloned());
        self.run("sign", &args).map(|_| ())
    }

    fn copy_to(&self, paths: &[String], uri: &str) -> ToolchainResult<()> {
        let mut args = vec!["copy".to_string(), "--to".to_string(), uri.to_string()];
        args.extend(paths.iter().cloned());
        self.run("copy", &args).map(|_| ())
    }
}

/// Last few KiB of stderr, lossily decoded.
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flake_ref() {
        let tc = NixToolchain::new("/tmp/clone");
        assert_eq!(
            tc.flake_ref("abc123", "packages.x86_64-linux.default"),
            "git+file:///tmp/clone?rev=abc123#packages.x86_64-linux.default"
        );
    }

    #[test]
    fn test_build_output_requires_paths() {
        assert!(matches!(BuildOutput::new(vec![]), Err(ToolchainError::NoOutputs)));
        assert!(BuildOutput::new(vec!["/nix/store/a-b".to_string()]).is_ok());
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = vec![b'x'; STDERR_TAIL_BYTES + 100];
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL_BYTES);
        assert_eq!(stderr_tail(b"  error: boom \n"), "error: boom");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let tc = NixToolchain::new("/tmp/clone").with_program("/nonexistent/nix-binary");
        assert!(matches!(
            tc.build("abc", "hello"),
            Err(ToolchainError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_step_failure() {
        let tc = NixToolchain::new("/tmp/clone").with_program("false");
        assert!(matches!(
            tc.copy_to(&["/nix/store/a-b".to_string()], "s3://bucket"),
            Err(ToolchainError::Failed { step: "copy", .. })
        ));
    }
}
