//! db-session - Main entry point.
//!
//! Runs the given SQL statements inside one scoped transaction. The transaction is rolled
//! back unless `--commit` is passed.

use db_session::config::Config;
use db_session::error::DbResult;
use db_session::models::{ModelCatalog, mask_connection_string};
use db_session::session::Session;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

async fn run(session: &mut Session, config: &Config) -> DbResult<()> {
    let version = session.server_version().await?;
    info!(version = %version, "Connected");

    let mut scope = session.begin_scoped_transaction(config.isolation).await?;
    for (index, sql) in config.statements.iter().enumerate() {
        let affected = scope.execute(sql, &[]).await?;
        println!("[{}] {} row(s) affected", index + 1, affected);
    }

    if config.commit {
        scope.complete()?;
    } else {
        info!("Dry run: rolling back (pass --commit to persist)");
    }
    scope.dispose().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let settings = config.settings();
    info!(
        database = %mask_connection_string(&settings.connection_string),
        isolation = %config.isolation,
        commit = config.commit,
        "Starting db-session v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut session = Session::connect(&settings, Arc::new(ModelCatalog::new())).await?;

    // Always dispose, so a failed statement still rolls back before the connection closes
    let result = run(&mut session, &config).await;
    let disposed = session.dispose().await;

    if let Err(e) = &result {
        error!(error = %e, "Run failed");
    }
    result?;
    disposed?;

    info!("Done");
    Ok(())
}
