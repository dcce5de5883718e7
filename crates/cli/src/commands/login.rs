// `murmur login`: exchange a username/password for a relay session token.

use std::path::Path;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use crate::client;
use crate::output::{self, OutputFormat};
use crate::session_file::{self, StoredSession};

use super::{block_on, DEFAULT_SERVER};

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Relay base URL.
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,
    #[arg(long, short)]
    username: String,
    #[arg(long, short)]
    password: String,
    /// Print the token without writing the session file.
    #[arg(long)]
    no_save: bool,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    pub server: String,
    pub token: String,
    pub saved_to: Option<String>,
}

pub fn run(args: LoginArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let session_path = if args.no_save { None } else { session_file::default_session_path() };

    match block_on(login(&args, session_path.as_deref())).and_then(|result| result) {
        Ok(result) => {
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}

async fn login(args: &LoginArgs, session_path: Option<&Path>) -> anyhow::Result<LoginResult> {
    let server = client::parse_server_url(&args.server)?;
    let token = client::login(&server, &args.username, &args.password)
        .await
        .with_context(|| format!("login to {server} failed"))?;

    let saved_to = match session_path {
        Some(path) => Some(save_session(path, server.as_str(), &token)?),
        None => None,
    };

    Ok(LoginResult { server: server.to_string(), token, saved_to })
}

fn save_session(path: &Path, server: &str, token: &str) -> anyhow::Result<String> {
    let session = StoredSession { server: server.to_string(), token: token.to_string() };
    session_file::save(path, &session)?;
    Ok(path.display().to_string())
}

fn format_human(result: &LoginResult) -> String {
    let mut text = format!("Logged in to {}\nToken: {}", result.server, result.token);
    if let Some(path) = &result.saved_to {
        text.push_str(&format!("\nSaved to {path}"));
    }
    text
}
