use std::path::PathBuf;

use clap::Parser;
use librarian::catalog::Catalog;
use librarian::config::{Cli, Config, LogFormat, default_config_dir, default_config_path};
use librarian::db::Database;
use librarian::menu::Menu;
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.app.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match cfg.app.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    // With --config the file's directory holds the database, otherwise ~/.librarian/
    let (config_path, data_dir, explicit) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir, true)
        }
        None => (default_config_path(), default_config_dir(), false),
    };

    let cfg = Config::load_or_default(&config_path, explicit).unwrap_or_else(|e| {
        eprintln!("failed to load config file {:?}: {}", config_path, e);
        std::process::exit(1);
    });

    init_tracing(&cfg);
    tracing::info!("librarian starting");
    if cfg.defaulted {
        tracing::info!(path = ?config_path, "no config file found, using defaults");
    }
    for var in &cfg.missing_env_vars {
        tracing::warn!(var = %var, "environment variable not found");
    }

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(error = %e, path = ?data_dir, "failed to create data directory");
        std::process::exit(1);
    }

    let db = Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        eprintln!("failed to setup database: {e:#}");
        std::process::exit(1);
    });
    if let Err(e) = db.sync().await {
        tracing::warn!(error = %e, "initial sync failed");
    }

    let catalog = Catalog::from_config(db, &cfg.app);
    tracing::info!(policy = catalog.policy().as_str(), "catalog ready");
    if cfg.app.seed_sample_books {
        let added = catalog.seed_samples().await;
        tracing::info!(added, "sample books seeded");
    }

    let cancellation_token = CancellationToken::new();
    let signal_token = cancellation_token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            signal_token.cancel();
        }
    });

    let menu = Menu::new(
        &catalog,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        cancellation_token.clone(),
    );
    let result = menu.run().await;

    if let Err(e) = catalog.store().sync().await {
        tracing::warn!(error = %e, "final sync failed");
    }
    drop(catalog);

    match result {
        Ok(()) => tracing::info!("librarian going off, shutdown complete"),
        Err(e) => {
            tracing::error!(error = %e, "menu loop failed");
            std::process::exit(1);
        }
    }

    // A pending stdin read would otherwise hold the runtime open.
    if cancellation_token.is_cancelled() {
        std::process::exit(0);
    }
}
