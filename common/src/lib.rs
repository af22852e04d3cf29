//! Shared runtime support for the rscp tools
//!
//! Binaries hand their async entry point to [`run`], which installs the tracing
//! subscriber, builds the tokio runtime, executes the entry point and reports
//! the outcome on the terminal.

use anyhow::Context;

pub mod config;

pub use config::{OutputConfig, RuntimeConfig};

/// Install a `tracing` fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the verbosity level when set.
pub fn setup_tracing(output: &OutputConfig) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new(output.filter_directive()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

/// Build a multi-threaded tokio runtime honoring the thread limits.
pub fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder.build().context("failed to build tokio runtime")
}

/// Run `func` to completion and report the result.
///
/// Returns `None` when the operation failed (the error is printed unless
/// `quiet` is set), otherwise the summary it produced.
pub fn run<Summary, Fut>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    if let Some(error) = setup_tracing(&output).err().filter(|_| !output.quiet) {
        eprintln!("{error:#}");
    }
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
