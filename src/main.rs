//! Directory Searcher - terminal front end.
//!
//! Reads commands from stdin, runs searches and renders the search view.

#![deny(clippy::all)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use directory_searcher::auth::{BrowserLauncher, CompletionPayload};
use directory_searcher::{Config, SearchDispatch, SearchOrchestrator, SearchOutcome, SearchView};

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging. Logs go to stderr; stdout is the UI.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// A line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Search(String),
    SignOut,
    Cancel,
    Help,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "search" | "s" => Command::Search(rest.to_string()),
        "signout" | "sign-out" => Command::SignOut,
        "cancel" => Command::Cancel,
        "help" | "?" | "" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(verb.to_string()),
    }
}

async fn run(config: Config) -> Result<()> {
    let (completion_tx, mut completion_rx) = mpsc::channel::<CompletionPayload>(1);
    let launcher = Arc::new(BrowserLauncher::new(completion_tx));

    let orchestrator = match SearchOrchestrator::new(&config, launcher.clone()).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e).context("Failed to initialize");
        }
    };
    let completer = orchestrator.completer();

    let mut view_rx = orchestrator.subscribe();
    tokio::spawn(async move {
        let mut last_rendered = None;
        while view_rx.changed().await.is_ok() {
            let view = view_rx.borrow_and_update().clone();
            let key = (view.attempt, view.outcome.clone());
            if view.outcome.is_some() && last_rendered.as_ref() != Some(&key) {
                render(&view);
                last_rendered = Some(key);
            }
        }
    });

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };

                match parse_command(&line) {
                    Command::Search(term) => {
                        if !orchestrator.view().is_search_enabled() {
                            println!("A sign-in is in progress. Finish it or type `cancel`.");
                            continue;
                        }
                        if orchestrator.search(&term).await == SearchDispatch::AwaitingSignIn {
                            println!("Complete the sign-in in your browser (type `cancel` to abort).");
                        }
                    }
                    Command::SignOut => {
                        orchestrator.sign_out();
                        println!("Signed out.");
                    }
                    Command::Cancel => {
                        if !launcher.cancel() {
                            println!("No sign-in to cancel.");
                        }
                    }
                    Command::Help => print_help(),
                    Command::Quit => break,
                    Command::Unknown(verb) => println!("Unknown command '{}'. Type `help`.", verb),
                }
            }

            Some(payload) = completion_rx.recv() => {
                let completer = completer.clone();
                tokio::spawn(async move {
                    completer.on_external_auth_completion(payload).await;
                });
            }
        }
    }

    launcher.cancel();
    info!("Exiting");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  search <term>   find users whose principal name starts with <term>");
    println!("  signout         clear cached tokens");
    println!("  cancel          abandon a sign-in in progress");
    println!("  quit");
}

fn render(view: &SearchView) {
    let Some(outcome) = &view.outcome else {
        return;
    };

    if let Some(user) = &view.active_user {
        println!("Signed in as {}", user);
    }

    match outcome {
        SearchOutcome::Success(users) => {
            println!("{}", outcome.status_text());
            for user in users {
                println!("  {:<40} {}", user.principal_name, user.display_name);
            }
        }
        SearchOutcome::NoResults => println!("{}", outcome.status_text()),
        _ => println!("{}", outcome.user_message()),
    }
}
