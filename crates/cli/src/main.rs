//! blobq - queued transfers for S3-compatible object storage

use blobq_cli::commands::{self, Cli};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let exit_code = commands::execute(cli);
    std::process::exit(exit_code.as_i32());
}

/// Log to stderr; `RUST_LOG` wins over `--debug`
fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
