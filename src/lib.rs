//! Nix binary cache lane
//!
//! Two maintenance jobs over a Nix binary cache fed by a git repository:
//!
//! - [`publish`]: build every ref × package, sign and upload the results, and
//!   remember what was published so re-runs only build what changed.
//! - [`gc`]: walk the cache bucket and drop objects that are too old or not
//!   signed by a trusted key, deleting each narinfo together with its NAR.
//!
//! External tools sit behind traits ([`refs::RefSource`],
//! [`toolchain::Toolchain`], [`nix_cache_store::ObjectStore`]) with fakes in
//! [`mock`] for tests.

pub mod config;
pub mod gc;
pub mod logging;
pub mod mock;
pub mod publish;
pub mod refs;
pub mod signal;
pub mod state;
pub mod summary;
pub mod toolchain;

pub use config::{ConfigError, GcArgs, GcConfig, PublishArgs, PublishConfig};
pub use gc::{Collector, GcOptions, GcReport, RetentionPolicy};
pub use publish::{PublishOptions, PublishReport, Publisher};
pub use refs::{Ref, RefFilter, RefSource};
pub use state::StateStore;
pub use summary::{ExitCode, RunSummary};
pub use toolchain::{NixToolchain, Toolchain};
