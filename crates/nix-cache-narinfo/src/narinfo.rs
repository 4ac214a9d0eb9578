//! Narinfo record parsing
//!
//! A narinfo is a line-oriented `Key: value` document. Only `StorePath` and
//! `URL` are mandatory here; everything else is optional so that records
//! written by older or foreign tooling still parse. Unknown keys are ignored.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::Signature;

/// Errors from narinfo parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NarInfoError {
    #[error("narinfo is not valid UTF-8")]
    NotUtf8,

    #[error("line {line}: expected `Key: value`")]
    MalformedLine { line: usize },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("field {field} has invalid value {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

/// Parsed narinfo record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarInfo {
    /// Full store path of the artifact, e.g. `/nix/store/<hash>-hello-2.12`
    pub store_path: String,

    /// Key of the NAR payload relative to the cache root
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nar_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nar_size: Option<u64>,

    /// Base names of referenced store paths
    #[serde(default)]
    pub references: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deriver: Option<String>,

    /// Signatures in document order
    #[serde(default)]
    pub signatures: Vec<Signature>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

impl NarInfo {
    /// Parse a narinfo from raw object bytes.
    pub fn parse(body: &[u8]) -> Result<Self, NarInfoError> {
        let text = std::str::from_utf8(body).map_err(|_| NarInfoError::NotUtf8)?;
        text.parse()
    }

    /// Key names of all signatures, in document order.
    pub fn key_names(&self) -> Vec<&str> {
        self.signatures.iter().map(Signature::key_name).collect()
    }

    /// Directory holding the store path (normally `/nix/store`).
    pub fn store_dir(&self) -> &str {
        match self.store_path.rfind('/') {
            Some(idx) if idx > 0 => &self.store_path[..idx],
            _ => "/nix/store",
        }
    }

    /// Fingerprint that Nix signs for this path.
    ///
    /// `1;<store path>;<nar hash>;<nar size>;<full reference paths, comma separated>`.
    /// Returns `None` when the hash or size is missing, since such a record
    /// cannot carry a verifiable signature.
    pub fn fingerprint(&self) -> Option<String> {
        let nar_hash = self.nar_hash.as_deref()?;
        let nar_size = self.nar_size?;
        let store_dir = self.store_dir();
        let references = self
            .references
            .iter()
            .map(|r| format!("{}/{}", store_dir, r))
            .collect::<Vec<_>>()
            .join(",");

        Some(format!(
            "1;{};{};{};{}",
            self.store_path, nar_hash, nar_size, references
        ))
    }
}

impl FromStr for NarInfo {
    type Err = NarInfoError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut store_path = None;
        let mut url = None;
        let mut info = NarInfo {
            store_path: String::new(),
            url: String::new(),
            compression: None,
            file_hash: None,
            file_size: None,
            nar_hash: None,
            nar_size: None,
            references: Vec::new(),
            deriver: None,
            signatures: Vec::new(),
            ca: None,
        };

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or(NarInfoError::MalformedLine { line: idx + 1 })?;
            let value = value.trim();

            match key.trim() {
                "StorePath" => store_path = Some(value.to_string()),
                "URL" => url = Some(value.to_string()),
                "Compression" => info.compression = Some(value.to_string()),
                "FileHash" => info.file_hash = Some(value.to_string()),
                "FileSize" => info.file_size = Some(parse_size("FileSize", value)?),
                "NarHash" => info.nar_hash = Some(value.to_string()),
                "NarSize" => info.nar_size = Some(parse_size("NarSize", value)?),
                "References" => {
                    info.references = value.split_whitespace().map(str::to_string).collect();
                }
                "Deriver" if !value.is_empty() && value != "unknown-deriver" => {
                    info.deriver = Some(value.to_string());
                }
                "Sig" => info.signatures.push(Signature::new(value)),
                "CA" => info.ca = Some(value.to_string()),
                _ => {}
            }
        }

        info.store_path = store_path
            .filter(|s| !s.is_empty())
            .ok_or(NarInfoError::MissingField("StorePath"))?;
        info.url = url
            .filter(|s| !s.is_empty())
            .ok_or(NarInfoError::MissingField("URL"))?;

        Ok(info)
    }
}

fn parse_size(field: &'static str, value: &str) -> Result<u64, NarInfoError> {
    value.parse().map_err(|_| NarInfoError::InvalidValue {
        field,
        value: value.to_string(),
    })
}
