//! db-session-pool - main entry point.
//!
//! Connects every configured section and prints the resulting pool state
//! as JSON.

use clap::Parser;
use db_session_pool::config::Config;
use db_session_pool::db::{ConnectionProvider, MemoryProvider, SessionPool, SqlxProvider};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the snapshot.
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    if config.sections.is_none() {
        eprintln!("Error: a section file must be configured.");
        eprintln!();
        eprintln!("Usage: db-session-pool --sections <path>");
        eprintln!("       POOL_SECTIONS=<path> db-session-pool");
        eprintln!();
        eprintln!("The file maps section names to connect parameters, for example:");
        eprintln!(r#"  {{"default": {{"driver": "mysql", "address": "127.0.0.1", "port": "3306","#);
        eprintln!(r#"                "db_name": "my_db", "id": "user", "pw": "secret", "connection": "2"}}}}"#);
        std::process::exit(1);
    }

    info!(
        dry_run = config.dry_run,
        "Starting db-session-pool v{}",
        env!("CARGO_PKG_VERSION")
    );

    let sections = config.load_sections().await?;
    for section in sections.values() {
        info!(
            section = %section.name,
            driver = %section.driver,
            connections = section.initial_count(),
            dsn = %section.masked_dsn(),
            "Section configured"
        );
    }

    let provider: Arc<dyn ConnectionProvider> = if config.dry_run {
        Arc::new(MemoryProvider::new())
    } else {
        Arc::new(SqlxProvider::with_acquire_timeout(
            config.acquire_timeout_duration(),
        ))
    };

    let pool = match SessionPool::connect(sections, provider).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, suggestion = e.suggestion().unwrap_or_default(), "Bootstrap failed");
            return Err(e.into());
        }
    };

    let snapshot = pool.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
