use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use quiz_core::model::{CertificationId, RetryPolicy, SessionId, UserId};
use serde::Serialize;
use services::quiz_api::LeaderboardRequest;
use services::{Clock, QuizServices, ServiceConfig};
use storage::sqlite::SqliteRepository;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "quizctl")]
#[command(about = "Operator tool for the certification quiz store")]
#[command(version)]
struct Args {
    /// `SQLite` database URL or file path
    #[arg(long = "db", global = true, default_value = "sqlite://quiz.sqlite3", env = "QUIZ_DB_URL")]
    db_url: String,

    /// Completion jobs claimed per drain
    #[arg(long, global = true, default_value_t = 50, env = "QUIZ_WORKER_BATCH")]
    worker_batch: u32,

    /// Seconds between outbox polls when no completion is signalled
    #[arg(long, global = true, default_value_t = 5, env = "QUIZ_POLL_INTERVAL_SECS")]
    poll_interval_secs: u64,

    /// Delivery attempts before a completion job is dead-lettered
    #[arg(long, global = true, default_value_t = 12, env = "QUIZ_MAX_ATTEMPTS")]
    max_attempts: u32,

    /// Fixed seed for question sampling
    #[arg(long, global = true, env = "QUIZ_SAMPLING_SEED")]
    sampling_seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the schema, then exit
    Migrate,
    /// Apply completed sessions to statistics and leaderboards until Ctrl-C
    Worker,
    /// Process the completion jobs that are due right now, once
    Drain,
    /// Put dead-lettered completion jobs back in the queue
    RequeueFailed,
    /// Print one leaderboard page
    Leaderboard {
        #[arg(long)]
        certification: u64,
        /// `AllTime`, `Monthly` or `Weekly`
        #[arg(long, default_value = "AllTime")]
        period: String,
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 10)]
        take: u32,
        /// Highlight this user and report their standing
        #[arg(long)]
        user: Option<u64>,
    },
    /// Print a user's overall and per-certification statistics
    Stats {
        #[arg(long)]
        user: u64,
    },
    /// Print the results of a completed session
    Results {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        session: String,
    },
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            ..RetryPolicy::default()
        };
        ServiceConfig {
            worker_batch_size: self.worker_batch.max(1),
            poll_interval: std::time::Duration::from_secs(self.poll_interval_secs.max(1)),
            sampling_seed: self.sampling_seed,
            ..ServiceConfig::default()
        }
        .with_retry(retry)
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }
    let path = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = Path::new(path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Make sure the database file and its directory exist before connecting.
fn prepare_sqlite_file(db_url: &str) -> Result<()> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }
    let Some(path) = db_url.strip_prefix("sqlite://") else {
        bail!("invalid database url: {db_url}");
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid database url: {db_url}");
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run(args: Args) -> Result<()> {
    let db_url = normalize_sqlite_url(&args.db_url);
    prepare_sqlite_file(&db_url)?;

    if matches!(args.command, Command::Migrate) {
        let repo = SqliteRepository::connect(&db_url).await?;
        repo.migrate().await?;
        info!(db = %db_url, "schema is up to date");
        return Ok(());
    }

    let config = args.service_config();
    let services = QuizServices::new_sqlite(&db_url, Clock::default(), &config)
        .await
        .with_context(|| format!("opening {db_url}"))?;

    match args.command {
        Command::Migrate => {}
        Command::Worker => {
            info!(db = %db_url, "starting completion worker");
            services.completion().run(shutdown_signal()).await;
        }
        Command::Drain => {
            let report = services.completion().drain_due().await?;
            print_json(&report)?;
        }
        Command::RequeueFailed => {
            let count = services.completion().requeue_failed().await?;
            print_json(&serde_json::json!({ "requeued": count }))?;
        }
        Command::Leaderboard {
            certification,
            period,
            skip,
            take,
            user,
        } => {
            let page = services
                .api()
                .get_leaderboard(LeaderboardRequest {
                    certification_id: CertificationId::new(certification),
                    time_period: period,
                    skip,
                    take,
                    current_user_id: user.map(UserId::new),
                })
                .await?;
            print_json(&page)?;
        }
        Command::Stats { user } => {
            let stats = services.api().get_statistics(UserId::new(user)).await?;
            print_json(&stats)?;
        }
        Command::Results { user, session } => {
            let session_id: SessionId = session
                .parse()
                .with_context(|| format!("invalid session id: {session}"))?;
            let results = services
                .api()
                .get_results(UserId::new(user), session_id)
                .await?;
            print_json(&results)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    run(args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn relative_paths_become_absolute_urls() {
        let url = normalize_sqlite_url("data/quiz.sqlite3");
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/quiz.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/q.db"),
            "sqlite:///tmp/q.db"
        );
    }

    #[test]
    fn flags_feed_the_service_config() {
        let args = Args::parse_from([
            "quizctl",
            "--worker-batch",
            "7",
            "--max-attempts",
            "3",
            "--sampling-seed",
            "42",
            "drain",
        ]);
        let config = args.service_config();
        assert_eq!(config.worker_batch_size, 7);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::seconds(5));
        assert_eq!(config.sampling_seed, Some(42));
        assert!(matches!(args.command, Command::Drain));
    }

    #[test]
    fn leaderboard_defaults_to_all_time() {
        let args = Args::parse_from(["quizctl", "leaderboard", "--certification", "4"]);
        match args.command {
            Command::Leaderboard {
                certification,
                period,
                take,
                ..
            } => {
                assert_eq!(certification, 4);
                assert_eq!(period, "AllTime");
                assert_eq!(take, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
