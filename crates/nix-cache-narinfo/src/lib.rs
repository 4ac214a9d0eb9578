//! Metadata model for Nix binary caches.
//!
//! A binary cache holds two kinds of objects: `.narinfo` metadata records and
//! the NAR payloads they point at. This crate parses the former, classifies
//! object keys, and checks the signatures a narinfo carries.

mod key;
mod narinfo;
mod signature;

pub use key::ObjectKind;
pub use narinfo::{NarInfo, NarInfoError};
pub use signature::{PublicKey, Signature, SignatureError};

/// Suffix identifying metadata objects in a cache bucket.
pub const NARINFO_SUFFIX: &str = ".narinfo";
