//! Nix cache lane CLI
//!
//! Entry point for the `nix-cache` command-line tool.

use std::path::Path;
use std::process;

use chrono::Utc;
use clap::{Parser, Subcommand};
use nix_cache_lane::gc::{Collector, GcOptions};
use nix_cache_lane::logging::{init_logging, LogFormat};
use nix_cache_lane::publish::{PublishOptions, Publisher};
use nix_cache_lane::refs::{GitCheckout, RefSource};
use nix_cache_lane::signal::{SignalHandler, SignalState};
use nix_cache_lane::summary::RunKind;
use nix_cache_lane::{ExitCode, GcArgs, NixToolchain, PublishArgs, RunSummary, StateStore};
use nix_cache_store::{S3CliStore, S3Config};
use tracing::{error, info, info_span, warn};

#[derive(Parser)]
#[command(name = "nix-cache")]
#[command(about = "Publish refs to a Nix binary cache and prune it", version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, sign and upload every ref that changed since the last run
    Publish(PublishArgs),

    /// Drop expired and untrusted objects from the cache bucket
    Gc(GcArgs),
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        warn!(error = %e, "Could not install interrupt handler");
    }
    let signals = handler.state();

    let code = match cli.command {
        Commands::Publish(args) => run_publish(args, &signals),
        Commands::Gc(args) => run_gc(args, &signals),
    };

    process::exit(code.as_i32());
}

fn run_publish(args: PublishArgs, signals: &SignalState) -> ExitCode {
    let config = match args.resolve() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::Config;
        }
    };

    let run_id = new_run_id();
    let started_at = Utc::now();
    let _span = info_span!("publish", run_id = %run_id).entered();

    // Dropped on return, which removes the clone.
    let checkout = match GitCheckout::clone_from(&config.repo_url) {
        Ok(c) => c,
        Err(e) => {
            let message = format!("Could not clone {}: {}", config.repo_url, e);
            error!("{}", message);
            let summary = RunSummary::from_error(run_id, RunKind::Publish, started_at, message);
            write_summary(&summary, config.summary_path.as_deref());
            return ExitCode::Errors;
        }
    };

    let refs = match checkout.refs() {
        Ok(refs) => config.ref_filter.apply(refs),
        Err(e) => {
            let message = format!("Could not list refs of {}: {}", config.repo_url, e);
            error!("{}", message);
            let summary = RunSummary::from_error(run_id, RunKind::Publish, started_at, message);
            write_summary(&summary, config.summary_path.as_deref());
            return ExitCode::Errors;
        }
    };
    info!("Processing {} refs", refs.len());

    let toolchain = NixToolchain::new(checkout.path());
    let options = PublishOptions {
        packages: config.packages.clone(),
        signing_key: config.private_key_file.clone(),
        upload_uri: config.upload_uri.clone(),
    };
    let publisher = match Publisher::new(&toolchain, config.state_dir.clone().map(StateStore::new), options) {
        Ok(p) => p,
        Err(e) => {
            error!("Configuration error: {}", e);
            let mut summary = RunSummary::from_error(run_id, RunKind::Publish, started_at, e);
            summary.exit_code = ExitCode::Config.as_i32();
            write_summary(&summary, config.summary_path.as_deref());
            return ExitCode::Config;
        }
    };

    let report = publisher.run(&refs, signals);
    if report.interrupted {
        warn!("Interrupted; remaining refs were not processed");
    }
    info!(
        published = report.published,
        skipped = report.skipped,
        "Encountered {} errors",
        report.error_count()
    );

    let summary = RunSummary::from_publish(run_id, started_at, &report);
    write_summary(&summary, config.summary_path.as_deref());

    ExitCode::for_run(report.error_count(), report.interrupted)
}

fn run_gc(args: GcArgs, signals: &SignalState) -> ExitCode {
    let config = match args.resolve() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::Config;
        }
    };

    let run_id = new_run_id();
    let started_at = Utc::now();
    let _span = info_span!("gc", run_id = %run_id, bucket = %config.bucket).entered();

    let store = S3CliStore::new(S3Config::new(&config.bucket).with_endpoint(config.endpoint.clone()));
    let options = GcOptions {
        dry_run: config.dry_run,
        ..GcOptions::default()
    };

    let report = Collector::new(&store, &config.policy, options).run(Utc::now(), signals);
    if report.interrupted {
        warn!("Interrupted; remaining objects were not processed");
    }
    info!(
        dropped = report.dropped,
        seen = report.total_seen,
        "Encountered {} errors",
        report.error_count()
    );

    let summary = RunSummary::from_gc(run_id, started_at, &report);
    write_summary(&summary, config.summary_path.as_deref());

    ExitCode::for_run(report.error_count(), report.interrupted)
}

fn write_summary(summary: &RunSummary, path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = summary.write_to_file(path) {
        warn!(path = %path.display(), error = %e, "Could not write run summary");
    }
}

fn new_run_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
