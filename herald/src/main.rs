//! herald - single-binary CLI (SPEC_FULL.md §3 / spec.md §6).
//!
//! Grounded on the teacher's `main.rs`: `clap::Parser` args, `EnvFilter`
//! logging init, `Config::load_with_defaults` against a default+override
//! pair, then dispatch. Unlike the teacher, there is no embedded server
//! mode by default — `daemon` is the long-running subcommand and every
//! other subcommand is a single Engine call that exits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use common::Config;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use herald::engine::{self, Engine};

#[derive(Parser, Debug)]
#[command(name = "herald", about = "Multi-user AI-assisted feed ingestion and curation engine")]
struct Args {
    /// Path to config.toml (overrides config.default.toml where they overlap)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format for commands that print data
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Text,
    Human,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter config.toml in the current directory.
    InitConfig,
    /// Import feeds from an OPML file for a user.
    Import {
        opml_path: PathBuf,
        #[arg(long)]
        user: String,
    },
    /// Fetch every subscribed feed once.
    FetchFeeds,
    /// Run the pipeline (summarize/security/curate/group) for one user.
    Process {
        #[arg(long)]
        user: String,
    },
    /// Fetch feeds, then process every user with a subscription (one cycle).
    Fetch,
    /// List unread articles for a user.
    List {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// List article groups instead of individual articles.
        #[arg(long)]
        cluster: bool,
    },
    /// Show one article by id.
    Read {
        #[arg(long)]
        user: String,
        id: i64,
    },
    /// Run the Poller forever at a fixed interval (seconds).
    Daemon {
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "herald: command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if let Command::InitConfig = args.command {
        return init_config().await;
    }

    let default_path = PathBuf::from("config.default.toml");
    let override_path = args.config.clone().or_else(|| {
        let p = PathBuf::from("config.toml");
        p.exists().then_some(p)
    });

    let config = Config::load_with_defaults(
        default_path.exists().then_some(default_path.as_path()),
        override_path.as_deref(),
    )
    .await?;

    let engine = Arc::new(engine::open(config).await?);

    match args.command {
        Command::InitConfig => unreachable!("handled above"),
        Command::Import { opml_path, user } => cmd_import(&engine, &opml_path, &user).await,
        Command::FetchFeeds => cmd_fetch_feeds(&engine).await,
        Command::Process { user } => cmd_process(&engine, &user).await,
        Command::Fetch => cmd_fetch_cycle(&engine).await,
        Command::List { user, limit, cluster } => cmd_list(&engine, &user, limit, cluster, args.format).await,
        Command::Read { user, id } => cmd_read(&engine, &user, id, args.format).await,
        Command::Daemon { interval } => cmd_daemon(engine, interval).await,
    }
}

async fn init_config() -> anyhow::Result<()> {
    let path = PathBuf::from("config.toml");
    if path.exists() {
        anyhow::bail!("config.toml already exists; remove it first if you want a fresh one");
    }

    let starter = r#"[database]
path = "data/herald.db"

[poll]
interval_seconds = 300

[ollama]
base_url = "http://localhost:11434"
security_model = "gemma3:4b"
curation_model = "llama3"
embedding_model = "nomic-embed-text"

[thresholds]
interest_threshold = 8.0
security_threshold = 7.0
similarity_threshold = 0.75

[read_only]
enabled = false
"#;
    tokio::fs::write(&path, starter).await?;
    info!(path = ?path, "herald: wrote starter config");
    println!("wrote {}", path.display());
    Ok(())
}

async fn resolve_user(engine: &Engine, name: &str) -> anyhow::Result<i64> {
    Ok(engine.resolve_user_by_name(name).await?.id)
}

async fn cmd_import(engine: &Engine, opml_path: &PathBuf, user: &str) -> anyhow::Result<()> {
    let user_id = resolve_user(engine, user).await?;
    let opml_text = tokio::fs::read_to_string(opml_path).await?;
    let report = herald::opml::import(engine, user_id, &opml_text).await?;
    println!(
        "imported {} feeds ({} subscribed, {} failed)",
        report.found, report.subscribed, report.failed
    );
    Ok(())
}

async fn cmd_fetch_feeds(engine: &Engine) -> anyhow::Result<()> {
    let (fetched, failed, new_articles) = engine.fetch_all_feeds().await?;
    println!("fetched {} feeds ({} failed), {} new articles", fetched, failed, new_articles);
    Ok(())
}

async fn cmd_process(engine: &Engine, user: &str) -> anyhow::Result<()> {
    let user_id = resolve_user(engine, user).await?;
    let stats = engine.process_new_articles(user_id).await?;
    println!(
        "considered {}, summarized {}, security-rejected {}, scored {}, skipped {}, groups touched {}",
        stats.considered, stats.summarized, stats.security_rejected, stats.scored, stats.skipped, stats.groups_touched
    );
    Ok(())
}

async fn cmd_fetch_cycle(engine: &Engine) -> anyhow::Result<()> {
    let (fetched, failed, new_articles) = engine.fetch_all_feeds().await?;
    let processed = engine.process_all_users().await?;
    println!(
        "fetched {} feeds ({} failed), {} new articles, processed {} users",
        fetched, failed, new_articles, processed
    );
    Ok(())
}

async fn cmd_list(engine: &Engine, user: &str, limit: i64, cluster: bool, format: OutputFormat) -> anyhow::Result<()> {
    let user_id = resolve_user(engine, user).await?;

    if cluster {
        let groups = engine.list_groups_for_user(user_id).await?;
        match format {
            OutputFormat::Json => {
                let json: Vec<_> = groups
                    .iter()
                    .map(|(g, s)| {
                        serde_json::json!({
                            "id": g.id,
                            "topic": g.topic,
                            "article_count": s.as_ref().map(|s| s.article_count).unwrap_or(0),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            _ => {
                for (group, summary) in groups {
                    let count = summary.as_ref().map(|s| s.article_count).unwrap_or(0);
                    println!("[{}] {} ({} articles)", group.id, group.topic, count);
                }
            }
        }
        return Ok(());
    }

    let articles = engine.list_unread(user_id, None, false, limit, 0).await?;
    match format {
        OutputFormat::Json => {
            let json: Vec<_> = articles
                .iter()
                .map(|a| serde_json::json!({"id": a.id, "title": a.title, "url": a.url}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            for article in articles {
                println!("[{}] {}", article.id, article.title);
            }
        }
    }
    Ok(())
}

async fn cmd_read(engine: &Engine, user: &str, id: i64, format: OutputFormat) -> anyhow::Result<()> {
    let user_id = resolve_user(engine, user).await?;
    let view = engine.get_article(user_id, id).await?;
    engine.mark_read(user_id, id, true).await?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": view.article.id,
                    "title": view.article.title,
                    "url": view.article.url,
                    "ai_summary": view.ai_summary,
                    "interest_score": view.interest_score,
                }))?
            );
        }
        _ => {
            println!("{}\n{}\n", view.article.title, view.article.url);
            if let Some(summary) = view.ai_summary {
                println!("{}", summary);
            }
        }
    }
    Ok(())
}

async fn cmd_daemon(engine: Arc<Engine>, interval: u64) -> anyhow::Result<()> {
    let poller = Arc::new(herald::poller::Poller::new(engine, std::time::Duration::from_secs(interval)));
    info!(interval_seconds = interval, "herald: starting daemon");

    let shutdown_poller = poller.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("herald: received shutdown signal");
        shutdown_poller.shutdown();
    });

    poller.run().await;
    Ok(())
}
