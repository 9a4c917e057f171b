//! clockwork - sign in to a clockwork time-tracking server from the terminal.
//!
//! The session is cached between runs (see `Config::store_backend`) and
//! validated against the server whenever it is restored.

mod console;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clockwork_core::api::ApiClient;
use clockwork_core::auth::{SessionManager, SessionState};
use clockwork_core::config::Config;
use clockwork_core::notify::{Notifier, TracingNotifier};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use console::ConsoleNotifier;

// ============================================================================
// Constants
// ============================================================================

/// Password used by `login` instead of prompting, for scripts
const PASSWORD_ENV: &str = "CLOCKWORK_PASSWORD";

/// Directory for a daily-rolling log file, in addition to stderr
const LOG_DIR_ENV: &str = "CLOCKWORK_LOG_DIR";

const LOG_FILE_PREFIX: &str = "clockwork.log";

const USAGE: &str = "\
Usage: clockwork <command>

Commands:
  status [--json]          Show who is signed in (validated with the server)
  login [email]            Sign in; password from prompt or CLOCKWORK_PASSWORD
  register <name> <email>  Create an account and sign in
  logout                   Sign out and forget the cached session
  help                     Show this message";

#[derive(Debug, PartialEq)]
enum Command {
    Status { json: bool },
    Login { email: Option<String> },
    Register { name: String, email: String },
    Logout,
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            [] | ["status"] => Ok(Command::Status { json: false }),
            ["status", "--json"] => Ok(Command::Status { json: true }),
            ["login"] => Ok(Command::Login { email: None }),
            ["login", email] => Ok(Command::Login {
                email: Some(email.to_string()),
            }),
            ["register", name, email] => Ok(Command::Register {
                name: name.to_string(),
                email: email.to_string(),
            }),
            ["logout"] => Ok(Command::Logout),
            ["help"] | ["--help"] | ["-h"] => Ok(Command::Help),
            _ => Err(anyhow::anyhow!("Unrecognized arguments: {}", args.join(" "))),
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(filter)
                .init();
            None
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(label).context("Failed to read password")
}

fn print_status(state: &SessionState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    match state {
        SessionState::Authenticated { user, confirmed } => {
            let note = if *confirmed { "" } else { " (not verified with server)" };
            println!("Signed in as {} (id {}){}", user.display_name(), user.id, note);
        }
        SessionState::Unauthenticated => println!("Not signed in"),
        SessionState::Initializing => println!("Starting up..."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return Ok(ExitCode::SUCCESS);
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    let log_dir = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from);
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(?command, "clockwork starting");

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let store = config.open_store().context("Failed to open session store")?;
    let api = ApiClient::new(config.api_base_url()).context("Failed to create HTTP client")?;
    // Keep stdout machine-readable in JSON mode
    let notifier: Arc<dyn Notifier> = if matches!(command, Command::Status { json: true }) {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(ConsoleNotifier)
    };
    let manager = SessionManager::new(Arc::new(api), store, notifier);
    let validation = manager.initialize();

    let succeeded = match command {
        Command::Status { json } => {
            if let Some(validation) = validation {
                validation.await.context("Session validation task failed")?;
            }
            print_status(&manager.state(), json)?;
            true
        }
        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = match std::env::var(PASSWORD_ENV) {
                Ok(password) => password,
                Err(_) => prompt_password("Password: ")?,
            };

            let result = manager.login(&email, &password).await;
            if result.is_ok() {
                config.last_email = Some(email);
                if let Err(e) = config.save() {
                    warn!(error = %e, "Failed to save config");
                }
            }
            result.is_ok()
        }
        Command::Register { name, email } => {
            let password = prompt_password("Password: ")?;
            let confirmation = prompt_password("Confirm password: ")?;
            manager
                .register(&name, &email, &password, &confirmation)
                .await
                .is_ok()
        }
        Command::Logout => {
            manager.logout().await;
            true
        }
        Command::Help => {
            println!("{}", USAGE);
            true
        }
    };

    info!("clockwork shutting down");
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
