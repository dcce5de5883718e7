// CLI subcommand dispatch.

use std::future::Future;

use anyhow::Context;
use clap::Subcommand;

pub mod connect;
pub mod login;

/// Relay address used when neither `--server` nor a saved session names one.
pub const DEFAULT_SERVER: &str = "http://localhost:8443";

#[derive(Subcommand)]
pub enum Command {
    /// Log in to a relay and save the session token
    Login(login::LoginArgs),
    /// Open a relay connection, broadcast a message and print what arrives
    Connect(connect::ConnectArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Login(args) => login::run(args),
        Command::Connect(args) => connect::run(args),
    }
}

/// Drives one command's async work on a fresh current-thread runtime.
fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
