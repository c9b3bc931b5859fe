//! Lumen terminal chat.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lumen_client::{
    ChatSession, ChatStore, ClientError, CollectingNotifier, DEFAULT_RELAY_URL, FileStore, Notice,
    RelayClient, SessionOptions,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Chat with a local model through the Lumen relay
#[derive(Parser)]
#[command(name = "lumen-chat")]
#[command(version)]
struct Args {
    /// Relay base URL
    #[arg(long, env = "LUMEN_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// Model to chat with
    #[arg(short, long, env = "LUMEN_MODEL")]
    model: Option<String>,

    /// System prompt sent ahead of the conversation
    #[arg(short, long)]
    system_prompt: Option<String>,

    /// Directory for chat history (defaults to the user data directory)
    #[arg(long)]
    history_dir: Option<String>,

    /// Warn when the model is silent for this many seconds
    #[arg(long)]
    slow_after_secs: Option<u64>,
}

const HELP: &str = "\
Commands:
  /models              list installed models
  /model <name>        switch model
  /system [prompt]     set or clear the system prompt
  /history             show the conversation
  /edit <n> <text>     replace turn n
  /delete <n>          remove turn n
  /clear               start over
  /quit                exit
Ctrl+C cancels a response in progress.";

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(dir: Option<&str>) -> Option<ChatStore> {
    let store = match dir {
        Some(dir) => FileStore::new(dir),
        None => FileStore::default_location(),
    };
    match store {
        Ok(store) => Some(ChatStore::new(Arc::new(store))),
        Err(e) => {
            warn!("Chat history disabled: {}", e);
            None
        }
    }
}

fn print_notices(notifier: &CollectingNotifier) {
    for notice in notifier.take() {
        let prefix = match notice {
            Notice::Info(_) => "",
            Notice::Warning(_) => "warning: ",
            Notice::Error(_) => "error: ",
        };
        eprintln!("{prefix}{}", notice.message());
    }
}

/// Send one message, echoing the reply as it streams.
async fn chat(session: &ChatSession, notifier: &CollectingNotifier, text: String) {
    // The session resets the live view once the turn is finalized, which
    // ends the printer.
    let mut live = session.subscribe_live();
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while live.changed().await.is_ok() {
            let view = live.borrow_and_update().clone();
            if view.content.is_empty() && view.stats.is_none() {
                break;
            }
            if let Some(fresh) = view.content.get(printed..).filter(|s| !s.is_empty()) {
                print!("{fresh}");
                let _ = std::io::stdout().flush();
                printed = view.content.len();
            }
        }
        printed
    });

    let result = session.send(text).await;
    if matches!(result, Err(ClientError::Busy)) {
        printer.abort();
        eprintln!("A response is already in progress.");
        return;
    }
    let printed = printer.await.unwrap_or(0);

    match result {
        Ok(turn) => {
            if let Some(rest) = turn.content.get(printed..) {
                print!("{rest}");
            }
            println!();
            if turn.interrupted {
                println!("[interrupted]");
            }
            if let Some(stats) = turn.stats {
                if let (Some(tps), Some(tokens)) = (stats.tokens_per_second, stats.total_tokens) {
                    println!("[{tokens} tokens, {tps} tok/s]");
                }
            }
        }
        Err(_) => println!(),
    }
    print_notices(notifier);
}

async fn run_command(session: &ChatSession, notifier: &CollectingNotifier, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/quit" | "/exit" => return false,
        "/help" => println!("{HELP}"),
        "/models" => match session.list_models().await {
            Ok(models) if models.is_empty() => println!("No models installed. Try `ollama pull`."),
            Ok(models) => {
                for model in models {
                    println!("{}  ({:.1} GB)", model.name, model.size as f64 / 1e9);
                }
            }
            Err(e) => eprintln!("error: {}", e.user_message()),
        },
        "/model" => {
            session.set_model(Some(rest.to_string())).await;
            match session.model().await {
                Some(model) => println!("Using {model}"),
                None => println!("No model selected"),
            }
        }
        "/system" => {
            let prompt = (!rest.is_empty()).then(|| rest.to_string());
            session.set_system_prompt(prompt).await;
        }
        "/history" => {
            for (i, turn) in session.conversation().await.iter().enumerate() {
                let marker = if turn.interrupted { " (interrupted)" } else { "" };
                println!("{i:>3} {}{marker}: {}", turn.role, turn.content);
            }
        }
        "/edit" => {
            let (index, text) = rest.split_once(' ').unwrap_or((rest, ""));
            match index.parse::<usize>() {
                Ok(index) => {
                    if let Err(e) = session.edit_turn(index, text.trim()).await {
                        eprintln!("error: {}", e.user_message());
                    }
                }
                Err(_) => eprintln!("usage: /edit <n> <text>"),
            }
        }
        "/delete" => match rest.parse::<usize>() {
            Ok(index) => {
                if let Err(e) = session.delete_turn(index).await {
                    eprintln!("error: {}", e.user_message());
                }
            }
            Err(_) => eprintln!("usage: /delete <n>"),
        },
        "/clear" => session.clear().await,
        other => eprintln!("Unknown command {other}. Type /help."),
    }

    print_notices(notifier);
    true
}

async fn run(args: Args) -> anyhow::Result<()> {
    let notifier = Arc::new(CollectingNotifier::new());
    let client = RelayClient::new(&args.relay_url)?;

    let mut builder = ChatSession::builder(client)
        .options(SessionOptions {
            model: args.model,
            system_prompt: args.system_prompt,
            slow_response_after: args.slow_after_secs.map(Duration::from_secs),
            ..SessionOptions::default()
        })
        .notifier(notifier.clone());
    if let Some(store) = open_store(args.history_dir.as_deref()) {
        builder = builder.store(store);
    }
    let session = builder.build();

    if session.restore().await {
        println!(
            "Restored {} turns. Type /history to review.",
            session.conversation().await.len()
        );
    }
    print_notices(&notifier);
    println!("Type a message, or /help.");

    // Ctrl+C cancels the response in flight, or quits when idle.
    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !cancel.cancel() {
                let _ = quit_tx.send(()).await;
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit_rx.recv() => None,
        };
        let Some(line) = line else {
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            if !run_command(&session, &notifier, line).await {
                break;
            }
        } else {
            chat(&session, &notifier, line.to_string()).await;
        }
    }

    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    if let Err(e) = run(Args::parse()).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
