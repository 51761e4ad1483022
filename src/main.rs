use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::{LoggingConfig, RatewardenConfig};
use ratewarden::store::{BucketStore, InMemoryStore};
use ratewarden::{LimitResult, RateLimiter};

/// Check and consume rate limit quota against a shared store.
#[derive(Parser, Debug)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Store URL, overrides the configuration (`memory://` for a local store)
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Requests per window, overrides the configuration
    #[arg(long, global = true)]
    quota: Option<u64>,

    /// Window length in seconds, overrides the configuration
    #[arg(long, global = true)]
    window_secs: Option<u64>,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count requests for an identifier and print the remaining quota
    Consume {
        identifier: String,

        /// Number of requests to count
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Issue all requests at once instead of one after another
        #[arg(long)]
        parallel: bool,
    },
    /// Print the current window for an identifier without consuming
    Peek { identifier: String },
    /// Check that the store answers
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RatewardenConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = &cli.store_url {
        config.store.url = url.clone();
    }
    if let Some(quota) = cli.quota {
        config.limits.quota = quota;
    }
    if let Some(window_secs) = cli.window_secs {
        config.limits.window_secs = window_secs;
    }
    config.validate()?;

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Ratewarden");

    let settings = config.limits.settings(&config.store);
    if config.store.is_memory() {
        let limiter = RateLimiter::init(InMemoryStore::new(), settings).await?;
        run(limiter, cli.command, cli.json).await
    } else {
        let limiter = RateLimiter::from_config(&config.store, settings)
            .await
            .with_context(|| format!("connecting to {}", config.store.url))?;
        run(limiter, cli.command, cli.json).await
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run<S: BucketStore>(limiter: RateLimiter<S>, command: Command, json: bool) -> anyhow::Result<()> {
    let outcome = execute(&limiter, command, json).await;
    limiter.close().await?;
    outcome
}

async fn execute<S: BucketStore>(limiter: &RateLimiter<S>, command: Command, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Consume {
            identifier,
            count,
            parallel,
        } => {
            if parallel {
                let calls = (0..count).map(|_| limiter.check_and_consume(&identifier));
                for result in join_all(calls).await {
                    print_result(&identifier, &result?, json)?;
                }
            } else {
                for _ in 0..count {
                    let result = limiter.check_and_consume(&identifier).await?;
                    print_result(&identifier, &result, json)?;
                }
            }
        }
        Command::Peek { identifier } => match limiter.peek(&identifier).await? {
            Some(result) => print_result(&identifier, &result, json)?,
            None if json => println!("null"),
            None => println!("{}: no active window", identifier),
        },
        Command::Ping => println!("PONG"),
    }
    Ok(())
}

fn print_result(identifier: &str, result: &LimitResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
    } else {
        println!(
            "{}: quota={} used={} remaining={} retry_after={} ({}s)",
            identifier,
            result.quota,
            result.used,
            result.remaining,
            result.retry_after.to_rfc3339(),
            result.retry_after_secs(Utc::now()),
        );
    }
    Ok(())
}
