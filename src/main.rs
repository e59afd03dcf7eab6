use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use streamlens::config::normalize_database_url;
use streamlens::semantic::{dump_to_json, load_catalog};
use streamlens::{EngineConfig, QueryEngine, QueryStatus, TenantId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamlens")]
#[command(about = "Ask questions about your stream analytics in plain English")]
struct Args {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Catalog JSON file (overrides NLQ_CATALOG_PATH)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Maximum rows returned per answer
    #[arg(long, global = true)]
    max_rows: Option<usize>,

    /// Statement timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question and record it in the history
    Ask {
        /// The question, e.g. "what were my peak viewers last tuesday"
        prompt: String,

        /// Streamer (users.id) asking the question
        #[arg(short, long)]
        tenant: i64,

        /// Pick this reading (1-based) if the question is ambiguous
        #[arg(long)]
        choose: Option<usize>,

        /// Resolve relative dates against this UTC time ("YYYY-MM-DD HH:MM:SS")
        #[arg(long)]
        now: Option<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a streamer's past questions, newest first
    History {
        #[arg(short, long)]
        tenant: i64,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the semantic catalog as JSON
    Catalog,
    /// Create the analytics tables if they do not exist
    InitSchema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = build_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Catalog => {
            let catalog = load_catalog(&config)?;
            println!("{}", dump_to_json(&catalog)?);
        }
        Command::InitSchema => {
            let engine = QueryEngine::from_config(&config).await?;
            engine.store().init_schema().await?;
            info!(store = engine.store().name(), "schema ready");
        }
        Command::History { tenant, limit } => {
            let engine = QueryEngine::from_config(&config).await?;
            for record in engine.history(TenantId(tenant), limit).await? {
                println!(
                    "{}  #{}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.id,
                    record.prompt
                );
            }
        }
        Command::Ask {
            prompt,
            tenant,
            choose,
            now,
            json,
        } => {
            let now = match now {
                Some(raw) => NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                    .with_context(|| format!("invalid --now value {:?}", raw))?,
                None => Utc::now().naive_utc(),
            };
            let engine = QueryEngine::from_config(&config).await?;
            info!("streamlens ready");

            let tenant = TenantId(tenant);
            let outcome = match choose {
                Some(choice) => engine.resolve_query_with_choice(tenant, &prompt, now, choice).await?,
                None => engine.resolve_query(tenant, &prompt, now).await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }

            println!("{}", outcome.summary.as_deref().unwrap_or(&outcome.message));
            if let Some(candidates) = &outcome.candidates {
                for (i, candidate) in candidates.iter().enumerate() {
                    println!("  {}) {}", i + 1, candidate.description);
                }
                println!("Re-run with --choose <N> to pick one.");
            }
            if let (QueryStatus::Ok, Some(payload)) = (outcome.status, &outcome.structured_payload) {
                for row in &payload.rows {
                    println!("  {}", serde_json::Value::Object(row.clone()));
                }
            }
        }
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(url) = &args.database_url {
        config.database_url = normalize_database_url(url);
    }
    if let Some(path) = &args.catalog {
        config.catalog_path = Some(path.clone());
    }
    if let Some(max_rows) = args.max_rows {
        anyhow::ensure!(max_rows > 0, "--max-rows must be at least 1");
        config.max_rows = max_rows;
    }
    if let Some(ms) = args.timeout_ms {
        config.statement_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}
