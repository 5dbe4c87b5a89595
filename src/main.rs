use anyhow::Result;
use clap::Parser;
use giving_central::{config, db, http, mail, outbox};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/giving_central.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let mailer = mail::from_config(&cfg)?;
    let bind = cfg.app.bind.clone();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let state = http::AppState::new(pool.clone(), cfg, mailer.clone());

    // Outbox worker: one email at a time.
    tokio::spawn(async move {
        loop {
            match outbox::process_next_task(&pool, mailer.as_ref()).await {
                Ok(processed) => {
                    if !processed {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "outbox worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "listening");
    axum::serve(listener, http::build_router(state)).await?;

    Ok(())
}
