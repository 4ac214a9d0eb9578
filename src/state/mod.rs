//! Durable publish state
//!
//! One plain-text record per ref, stored at `<root>/<ref name>` and holding
//! the target id last published for that ref. Records are replaced with a
//! write-then-rename so a crash never leaves a partial file behind.

mod store;

pub use store::{BuildRecord, StateError, StateStore};
