//! `amicli` — a thin binary wrapping [`asterisk_ami::cli::run`].

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    asterisk_ami::cli::run().await
}
