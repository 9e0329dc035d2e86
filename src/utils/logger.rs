use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "poc_notebook=info";
const VERBOSE_DIRECTIVE: &str = "poc_notebook=debug,info";

/// `RUST_LOG` wins over the verbosity flag when it is set.
fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_DIRECTIVE
        } else {
            DEFAULT_DIRECTIVE
        })
    })
}

// Logs go to stderr: `merge` may stream its dataset on stdout.
pub fn init_cli_logger(verbose: bool) {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(layer)
        .init();
}

/// JSON lines for CI runs where logs are collected by another tool.
pub fn init_json_logger() {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(filter(false))
        .with(layer)
        .init();
}
