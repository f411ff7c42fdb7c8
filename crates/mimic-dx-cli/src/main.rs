use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use mimic_dx_client::DiagnosticClientFactory;
use mimic_dx_core::config::{ConfigLoader, LoggingConfig};
use mimic_dx_core::conversation::ConversationManager;
use mimic_dx_core::{SessionOrchestrator, SessionResult};
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

mod render;

#[derive(Parser, Debug)]
#[clap(
    name = "mimic-dx",
    author,
    version = "0.1.0",
    about = "Interactive client for clinical diagnostic sessions"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        short,
        global = true,
        help = "Configuration file (defaults to <config dir>/mimic-dx/config.yaml)"
    )]
    config: Option<PathBuf>,

    #[clap(long, global = true, help = "Base URL of the diagnostic service")]
    server_url: Option<String>,

    #[clap(long, short, global = true)]
    log_level: Option<String>,

    #[clap(long, global = true, help = "Print results as JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a diagnostic session and answer follow-up questions interactively
    Diagnose { query: String },
    /// Answer the pending follow-up question of the stored session
    Resume { answer: String },
    /// Send a single query to the legacy endpoint
    Query { text: String },
    /// Check that the diagnostic service is reachable
    Probe,
    /// Inspect or clear the stored conversation
    History {
        #[clap(subcommand)]
        action: HistoryCommands,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// Print the stored conversation
    Show,
    /// Delete the stored conversation
    Clear,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref()).await?;
    if let Some(url) = &cli.server_url {
        config.server.base_url = url.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    ConfigLoader::validate(&config)?;
    init_logging(&config.logging)?;

    log::debug!(
        "Using diagnostic service at {} with history in {}",
        config.server.base_url,
        config.storage.history_dir().display()
    );

    let client = DiagnosticClientFactory::create_http_client(config.server.client_config());
    let history = ConversationManager::new(config.storage.build_store());
    let mut orchestrator = SessionOrchestrator::new(client, history);
    orchestrator.restore().await;

    match cli.command {
        Commands::Diagnose { query } => run_diagnose(&mut orchestrator, &query, cli.json).await,
        Commands::Resume { answer } => {
            let cancel = CancellationToken::new();
            let result = cancel_on_interrupt(
                orchestrator.resume_session_cancellable(&answer, cancel.clone()),
                cancel,
                tokio::signal::ctrl_c(),
            )
            .await;
            show(&result, cli.json)?;
            if result.needs_follow_up() && !cli.json {
                println!("\n? {}", result.search_query);
                println!("Answer with: mimic-dx resume \"<answer>\"");
            }
            Ok(exit_code(&result))
        }
        Commands::Query { text } => match orchestrator.run_query(&text).await {
            Ok(response) if cli.json => render::json(&response).map(|_| ExitCode::SUCCESS),
            Ok(response) => render::query_response(&response).map(|_| ExitCode::SUCCESS),
            Err(failure) => {
                if cli.json {
                    render::json(&failure)?;
                } else {
                    render::failure(&failure);
                }
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Probe => {
            let outcome = orchestrator.probe().await;
            let code = if outcome.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
            if cli.json {
                render::json(&render::probe_report(orchestrator.base_url(), &outcome))?;
            } else {
                match &outcome {
                    Ok(()) => println!(
                        "Diagnostic service at {} is reachable",
                        orchestrator.base_url()
                    ),
                    Err(failure) => render::failure(failure),
                }
            }
            Ok(code)
        }
        Commands::History { action } => match action {
            HistoryCommands::Show => {
                if cli.json {
                    render::json(&orchestrator.conversation())?;
                } else {
                    render::history(orchestrator.conversation());
                }
                Ok(ExitCode::SUCCESS)
            }
            HistoryCommands::Clear => {
                orchestrator.clear_history().await?;
                println!("Conversation history cleared.");
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let log_level_filter = config.level.parse().unwrap_or(LevelFilter::Info);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level_filter);
    if let Some(path) = &config.file {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

async fn run_diagnose(
    orchestrator: &mut SessionOrchestrator,
    query: &str,
    json: bool,
) -> Result<ExitCode> {
    if !json {
        orchestrator.on_progress(render::progress);
    }

    let cancel = CancellationToken::new();
    let mut result = cancel_on_interrupt(
        orchestrator.start_session_cancellable(query, cancel.clone()),
        cancel,
        tokio::signal::ctrl_c(),
    )
    .await;
    show(&result, json)?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while result.needs_follow_up() {
        let answer = match prompt(&mut stdin, &result.search_query).await? {
            Some(answer) if !answer.is_empty() => answer,
            _ => {
                eprintln!("Session paused. Answer later with: mimic-dx resume \"<answer>\"");
                break;
            }
        };
        let cancel = CancellationToken::new();
        result = cancel_on_interrupt(
            orchestrator.resume_session_cancellable(&answer, cancel.clone()),
            cancel,
            tokio::signal::ctrl_c(),
        )
        .await;
        show(&result, json)?;
    }

    Ok(exit_code(&result))
}

/// Drive `work` to completion. If `interrupt` resolves first, fire `cancel` and
/// keep driving `work` so it can report the cancellation itself.
async fn cancel_on_interrupt<W, I>(work: W, cancel: CancellationToken, interrupt: I) -> W::Output
where
    W: Future,
    I: Future,
{
    tokio::pin!(work);
    tokio::select! {
        biased;
        output = &mut work => return output,
        _ = interrupt => {
            log::info!("Interrupted, cancelling the pending request");
            eprintln!("\nCancelling...");
            cancel.cancel();
        }
    }
    work.await
}

/// Ask `question` and read one line. `None` on end of input or Ctrl-C.
async fn prompt(stdin: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<Option<String>> {
    eprintln!("\n? {}", question);
    eprint!("> ");
    std::io::stderr().flush()?;

    tokio::select! {
        line = stdin.next_line() => Ok(line?.map(|answer| answer.trim().to_string())),
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            Ok(None)
        }
    }
}

fn show(result: &SessionResult, json: bool) -> Result<()> {
    if json {
        render::json(result)
    } else {
        render::session_result(result);
        Ok(())
    }
}

fn exit_code(result: &SessionResult) -> ExitCode {
    if result.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
