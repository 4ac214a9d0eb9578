//! S3 bucket access through the `aws` CLI
//!
//! Credentials, region and profile come from the CLI's own environment
//! (`AWS_PROFILE`, `AWS_REGION`, instance metadata, ...). Listing uses
//! `s3api list-objects-v2` with client-side pagination disabled so that each
//! call returns exactly one page and a continuation token.

use std::process::{Command, Output, Stdio};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{ListPage, ObjectMeta, ObjectStore, StoreError, StoreResult};

/// Connection settings for a bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,

    /// Custom endpoint (MinIO, R2, ...)
    pub endpoint_url: Option<String>,

    /// Keys per page (S3 caps this at 1000)
    pub page_size: u32,

    /// CLI executable
    pub program: String,
}

impl S3Config {
    /// Settings for `bucket` with the default endpoint.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint_url: None,
            page_size: 1000,
            program: "aws".to_string(),
        }
    }

    /// Use a custom endpoint.
    pub fn with_endpoint(mut self, endpoint_url: Option<String>) -> Self {
        self.endpoint_url = endpoint_url;
        self
    }
}

/// `list-objects-v2` response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsOutput {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    size: u64,
}

/// Bucket client backed by the `aws` CLI.
pub struct S3CliStore {
    config: S3Config,
}

impl S3CliStore {
    /// Create a client for the configured bucket.
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        if let Some(ref endpoint) = self.config.endpoint_url {
            cmd.arg("--endpoint-url").arg(endpoint);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn run(&self, mut cmd: Command, key: &str) -> StoreResult<Output> {
        let output = cmd.output().map_err(|e| StoreError::Access {
            key: key.to_string(),
            message: format!("failed to spawn {}: {}", self.config.program, e),
        })?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("(404)") || stderr.contains("NoSuchKey") || stderr.contains("Not Found") {
            return Err(StoreError::NotFound(key.to_string()));
        }

        Err(StoreError::Access {
            key: key.to_string(),
            message: format!("{} exited with {}: {}", self.config.program, output.status, stderr),
        })
    }

    fn object_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, key)
    }
}

impl ObjectStore for S3CliStore {
    fn list_page(&self, continuation: Option<&str>) -> StoreResult<ListPage> {
        let mut cmd = self.command();
        cmd.args(["s3api", "list-objects-v2", "--no-paginate", "--output", "json"])
            .arg("--bucket")
            .arg(&self.config.bucket)
            .arg("--max-keys")
            .arg(self.config.page_size.to_string());
        if let Some(token) = continuation {
            cmd.arg("--continuation-token").arg(token);
        }

        let output = self
            .run(cmd, &self.config.bucket)
            .map_err(|e| StoreError::Listing(e.to_string()))?;

        parse_listing(&output.stdout)
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let mut cmd = self.command();
        cmd.args(["s3", "cp", "--only-show-errors"])
            .arg(self.object_uri(key))
            .arg("-");

        Ok(self.run(cmd, key)?.stdout)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut cmd = self.command();
        cmd.args(["s3api", "delete-object"])
            .arg("--bucket")
            .arg(&self.config.bucket)
            .arg("--key")
            .arg(key);

        self.run(cmd, key)?;
        Ok(())
    }
}

/// Parse `list-objects-v2` output. An empty bucket may print nothing at all.
fn parse_listing(stdout: &[u8]) -> StoreResult<ListPage> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(ListPage::default());
    }

    let parsed: ListObjectsOutput = serde_json::from_slice(stdout)?;
    Ok(ListPage {
        objects: parsed
            .contents
            .into_iter()
            .map(|o| ObjectMeta::new(o.key, o.last_modified, o.size))
            .collect(),
        next: parsed.next_continuation_token.filter(|t| !t.is_empty()),
    })
}
