//! This file defines the pulseavg binary entry point.

use pulseavg::app;
use pulseavg::cli;
use pulseavg::error;
use pulseavg::tracing;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(err) = app::run(&args).await {
        error::log_error_chain(&err);
        std::process::exit(1);
    }
}
