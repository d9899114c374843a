// src/main.rs
// Engram - persistent semantic memory for AI coding assistants

use anyhow::Result;
use clap::{Parser, Subcommand};
use engram::config::MemoryConfig;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "engram", about = "Persistent semantic memory for AI coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host-facing hook handlers (read JSON on stdin, never fail the host)
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
    /// Create collections and payload indexes
    Init,
    /// Aggregate service health and queue statistics
    Status,
    /// Retry queue statistics
    QueueStats,
    /// Drain pending retry-queue entries through the storage pipeline
    Retry {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Search stored memories
    Search {
        query: String,
        #[arg(long, default_value = "code-patterns")]
        collection: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = false)]
        fast: bool,
        /// Search the shared conventions collection with no project filter
        #[arg(long, default_value_t = false)]
        best_practices: bool,
    },
    /// Search synced Jira data for one instance
    JiraSearch {
        query: String,
        /// Jira instance hostname (tenant key), e.g. company.atlassian.net
        #[arg(long)]
        group_id: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        issue_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Run a freshness scan of the code-patterns collection
    Freshness {
        #[arg(long)]
        group_id: Option<String>,
    },
    /// Internal: perform one metric push (spawned detached by the hot path)
    #[command(hide = true)]
    PushMetric { payload: String },
}

#[derive(Subcommand, Clone)]
enum HookAction {
    /// PostToolUse: capture code patterns from file edits
    PostTool,
    /// UserPromptSubmit: capture user messages
    UserPrompt,
    /// Stop: capture the agent's final response
    Stop,
    /// SessionStart: inject relevant memories as context
    SessionStart,
}

impl std::fmt::Display for HookAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookAction::PostTool => write!(f, "post_tool"),
            HookAction::UserPrompt => write!(f, "user_prompt"),
            HookAction::Stop => write!(f, "stop"),
            HookAction::SessionStart => write!(f, "session_start"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(MemoryConfig::load());

    // Hooks log quietly to stderr without timestamps; they are ephemeral
    // processes and their stderr is barely surfaced by the host.
    match &cli.command {
        Commands::Hook { .. } | Commands::PushMetric { .. } => {
            let hook_level =
                std::env::var("ENGRAM_HOOK_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
            let level = match hook_level.to_lowercase().as_str() {
                "off" => None,
                "error" => Some(Level::ERROR),
                "warn" => Some(Level::WARN),
                "info" => Some(Level::INFO),
                "debug" | "trace" => Some(Level::DEBUG),
                other => {
                    eprintln!("[engram] Unknown ENGRAM_HOOK_LOG_LEVEL={other:?}, using warn");
                    Some(Level::WARN)
                }
            };
            if let Some(level) = level {
                let subscriber = FmtSubscriber::builder()
                    .with_max_level(level)
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .without_time()
                    .with_target(false)
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
            }
        }
        _ => {
            let level = match config.log_level.to_lowercase().as_str() {
                "error" => Level::ERROR,
                "warn" | "warning" => Level::WARN,
                "debug" => Level::DEBUG,
                "trace" => Level::TRACE,
                _ => Level::INFO,
            };
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }

    match cli.command {
        Commands::Hook { action } => {
            let hook_name = action.to_string();
            let hook_config = config.clone();
            let body = async move {
                match action {
                    HookAction::PostTool => engram::hooks::post_tool::run(hook_config).await,
                    HookAction::UserPrompt => engram::hooks::user_prompt::run(hook_config).await,
                    HookAction::Stop => engram::hooks::stop::run(hook_config).await,
                    HookAction::SessionStart => engram::hooks::session::run(hook_config).await,
                }
            };
            engram::hooks::run_graceful(&hook_name, &config, body).await;
            Ok(())
        }
        Commands::Init => {
            let store = engram::store::VectorStore::connect(&config)?;
            store.ensure_collections().await?;
            println!("collections and payload indexes ready");
            Ok(())
        }
        Commands::Status => {
            let report = engram::health::check_health(config).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::QueueStats => {
            let queue = engram::queue::RetryQueue::new(config.queue_path.clone())?;
            let stats = queue.get_stats()?;
            engram::metrics::push_queue_size(
                &config,
                stats.awaiting_backoff,
                stats.exhausted,
                stats.ready_for_retry,
            );
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Retry { limit } => {
            let storage = engram::storage::MemoryStorage::new(config)?;
            let (stored, failed) = storage.process_pending(limit).await?;
            println!("retried: {stored} stored, {failed} failed");
            Ok(())
        }
        Commands::Search {
            query,
            collection,
            limit,
            fast,
            best_practices,
        } => {
            let search = engram::search::MemorySearch::new(config.clone())?;
            let results = if best_practices {
                search
                    .retrieve_best_practices(&query, limit.unwrap_or(3))
                    .await
            } else {
                let collection = engram::memory::Collection::parse(&collection)
                    .ok_or_else(|| anyhow::anyhow!("unknown collection: {collection}"))?;
                let cwd = std::env::current_dir()?.to_string_lossy().into_owned();
                let options = engram::search::SearchOptions {
                    cwd: Some(cwd),
                    limit,
                    fast_mode: fast,
                    score_threshold: Some(0.0),
                    ..engram::search::SearchOptions::default()
                };
                search.search(&query, collection, &options).await?
            };
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Commands::JiraSearch {
            query,
            group_id,
            project,
            issue_type,
            status,
            limit,
        } => {
            let search = engram::search::MemorySearch::new(config)?;
            let filters = engram::search::JiraSearchFilters {
                project,
                issue_type,
                status,
                ..engram::search::JiraSearchFilters::default()
            };
            let results = search.search_jira(&query, &group_id, &filters, limit).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Commands::Freshness { group_id } => {
            let store = engram::store::VectorStore::connect(&config)?;
            let report =
                engram::freshness::run_freshness_scan(&store, &config, group_id.as_deref()).await;
            engram::activity::ActivityLog::new(&config.install_dir).log_freshness(
                report.total_checked,
                report.stale_count,
                report.expired_count,
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::PushMetric { payload } => {
            // Detached child of the hot path; outcome is intentionally
            // invisible to the parent.
            if let Ok(push) = serde_json::from_str::<engram::metrics::MetricPush>(&payload) {
                engram::metrics::perform_push(&push).await;
            }
            Ok(())
        }
    }
}
