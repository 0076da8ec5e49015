//! Nexus CLI - manage and exercise a dashboard API session from the terminal.
//!
//! Stores the bearer token the same way the dashboard does, shows its expiry,
//! performs authenticated requests (refreshing on a 401), and can sit on a
//! session while it counts down to expiry.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nexus_core::auth::{claims, WarningPrompt};
use nexus_core::utils::{format_countdown, format_expiry};
use nexus_core::{Config, Navigator, Session};

/// How often `watch` checks whether the session is still alive
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

const USAGE: &str = "\
Usage: nexus <command>

Commands:
  token set [--remember]   Store an access token (read from a hidden prompt)
  token info               Show the stored token's expiry
  get <endpoint>           GET an API endpoint and print the JSON response
  watch                    Keep the session alive, prompting before it expires
  logout                   End the session and clear the stored token";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g., RUST_LOG=nexus_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// The CLI has no routes; a forced logout just tells the user what to do.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, _path: &str) {
        eprintln!("Session expired. Run `nexus token set` to sign in again.");
    }
}

struct TerminalPrompt;

impl WarningPrompt for TerminalPrompt {
    fn open(&self, remaining_secs: u64) {
        eprintln!(
            "Your session expires in {}. [e] extend, [l] log out",
            format_countdown(remaining_secs)
        );
    }

    fn close(&self) {
        eprintln!("Session prompt closed.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let config = Config::load()?;
    let session = Session::from_config(&config, Arc::new(TerminalNavigator))?;
    info!(base_url = %config.base_url, "Nexus CLI starting");

    match args.as_slice() {
        ["token", "set", rest @ ..] => set_token(&session, rest.contains(&"--remember")),
        ["token", "info"] => token_info(&session),
        ["get", endpoint] => get(&session, endpoint).await,
        ["watch"] => watch(&session).await,
        ["logout"] => {
            session.logout().await;
            println!("Logged out.");
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            bail!("unrecognized command");
        }
    }
}

fn set_token(session: &Session, remember_me: bool) -> Result<()> {
    let token = rpassword::prompt_password("Access token: ").context("Failed to read token")?;
    let token = token.trim();
    if token.is_empty() {
        bail!("No token entered");
    }
    if claims::decode(token).is_none() {
        eprintln!("Warning: token payload could not be decoded; expiry is unknown.");
    }

    session.establish(token.to_string(), remember_me);
    println!("Token stored.");
    Ok(())
}

fn token_info(session: &Session) -> Result<()> {
    let Some(info) = session.token_info() else {
        println!("No token stored.");
        return Ok(());
    };

    let subject = session
        .store()
        .get_token()
        .and_then(|t| claims::decode(&t))
        .and_then(|c| c.subject());

    println!("Subject:     {}", subject.as_deref().unwrap_or("unknown"));
    println!("Valid:       {}", if info.is_valid { "yes" } else { "no" });
    println!("Expires at:  {}", format_expiry(info.expiration));
    println!("Expires in:  {}", format_countdown(info.expires_in));
    if info.will_expire_soon {
        println!("The session expires soon.");
    }
    Ok(())
}

async fn get(session: &Session, endpoint: &str) -> Result<()> {
    let endpoint = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    };

    let value: Value = session.api().get(&endpoint).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        bail!("No valid session. Run `nexus token set` first.");
    }

    let warning = session.timeout_warning(Arc::new(TerminalPrompt));
    warning.activate();
    eprintln!("Watching session. Type `e` to extend, `l` to log out.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line?.as_deref().map(str::trim) {
                    Some("e") => match warning.extend().await {
                        Ok(()) => {
                            let remaining = session.token_info().map(|i| i.expires_in).unwrap_or(0);
                            eprintln!("Session extended; expires in {}.", format_countdown(remaining));
                        }
                        Err(e) => eprintln!("Could not extend session: {e}"),
                    },
                    Some("l") => {
                        warning.logout().await;
                        break;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::time::sleep(WATCH_POLL_INTERVAL) => {}
        }

        if !session.store().has_token() {
            break;
        }
    }

    warning.deactivate();
    println!("Session ended.");
    Ok(())
}
