//! Throwaway git clone
//!
//! The clone lives in a temporary directory owned by [`GitCheckout`] and is
//! removed when the checkout is dropped, whichever way the run ends.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Stdio};

use tempfile::TempDir;
use tracing::{debug, info};

use super::{Ref, RefSource};

/// Field separator for `for-each-ref` output. Tabs cannot appear in ref names.
const FIELD_SEP: char = '\t';

/// `for-each-ref` format: name, object, peeled object (annotated tags), symref target.
const REF_FORMAT: &str = "%(refname)%09%(objectname)%09%(*objectname)%09%(symref)";

/// Git errors
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to create clone directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git {command} failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected for-each-ref line: {0:?}")]
    Parse(String),
}

/// A fresh clone of a repository.
#[derive(Debug)]
pub struct GitCheckout {
    dir: TempDir,
}

impl GitCheckout {
    /// Clone `url` into a new temporary directory.
    pub fn clone_from(url: &str) -> Result<Self, GitError> {
        let dir = tempfile::Builder::new()
            .prefix("nix-cache-clone-")
            .tempdir()
            .map_err(GitError::TempDir)?;

        info!(url, path = %dir.path().display(), "Cloning repository");
        run_git(None, &["clone", "--quiet", "--", url, &dir.path().to_string_lossy()])?;

        Ok(Self { dir })
    }

    /// Location of the working tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl RefSource for GitCheckout {
    fn refs(&self) -> Result<Vec<Ref>, GitError> {
        let stdout = run_git(Some(self.path()), &["for-each-ref", &format!("--format={}", REF_FORMAT)])?;
        let refs = parse_ref_listing(&stdout)?;
        debug!(count = refs.len(), "Enumerated refs");
        Ok(refs)
    }
}

fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(GitError::Spawn)?;

    if !output.status.success() {
        return Err(GitError::Command {
            command: args.first().copied().unwrap_or_default().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `for-each-ref` output into resolved refs.
///
/// Annotated tags resolve to the commit they peel to. Symbolic refs such as
/// `refs/remotes/origin/HEAD` resolve to the name of the ref they point at,
/// so they collapse into that ref instead of being built twice.
pub(crate) fn parse_ref_listing(stdout: &str) -> Result<Vec<Ref>, GitError> {
    let mut seen = BTreeSet::new();
    let mut refs = Vec::new();

    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(FIELD_SEP).collect();
        let &[name, object, peeled, symref] = fields.as_slice() else {
            return Err(GitError::Parse(line.to_string()));
        };

        let name = if symref.is_empty() { name } else { symref };
        let target = if peeled.is_empty() { object } else { peeled };
        if name.is_empty() || target.is_empty() {
            return Err(GitError::Parse(line.to_string()));
        }

        let r = Ref::new(name, target);
        if seen.insert(r.clone()) {
            refs.push(r);
        }
    }

    Ok(refs)
}
