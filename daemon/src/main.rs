//! Daemon entry-point: loads settings and the source registry, wires the
//! adapters and ticks the scheduler until interrupted.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::env;
use std::ffi::OsString;
use std::sync::Arc;

use color_eyre::eyre::{Context, Result, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig as _;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use irrd_mirror::domain::LeaseRegistry;
use irrd_mirror::domain::ports::DatabaseHandler;
use irrd_mirror::domain::scheduler::MirrorScheduler;
use irrd_mirror::jobs::{MirrorJobPorts, MirrorJobRunner};
use irrd_mirror::outbound::memory::MemoryDatabase;
use irrd_mirror::outbound::persistence::{
    DbPool, DieselDatabaseHandler, PoolConfig, run_migrations,
};
use irrd_mirror::outbound::retrieval::RemoteFileRetriever;
use irrd_mirror::outbound::rpsl_text_parser::RpslTextParser;
use irrd_mirror::outbound::whois_nrtm::WhoisNrtmClient;
use irrd_mirror::settings::{DaemonSettings, SourceRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = load_settings(env::args_os())?;
    let sources_path = settings.sources_path();
    let registry = SourceRegistry::from_file(&sources_path)
        .wrap_err_with(|| format!("failed to load sources from {}", sources_path.display()))?;
    let sources: Vec<_> = registry.into_sources().into_iter().map(Arc::new).collect();
    info!(sources = sources.len(), path = %sources_path.display(), "source registry loaded");

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let database = open_database(&settings, Arc::clone(&clock)).await?;
    let retriever = RemoteFileRetriever::new(settings.request_timeout(), settings.temp_dir.clone())
        .wrap_err("failed to build HTTP client")?;

    let runner = MirrorJobRunner::new(MirrorJobPorts {
        database,
        retriever: Arc::new(retriever),
        stream_source: Arc::new(WhoisNrtmClient::new(settings.request_timeout())),
        parser: Arc::new(RpslTextParser),
        leases: Arc::new(LeaseRegistry::new()),
        clock: Arc::clone(&clock),
    });
    let mut scheduler = MirrorScheduler::new(sources, Arc::new(runner), clock);

    scheduler
        .run_until(settings.tick_interval(), async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

fn load_settings<I, T>(args: I) -> Result<DaemonSettings>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    DaemonSettings::load_from_iter(args).map_err(|err| eyre!("failed to load settings: {err}"))
}

async fn open_database(
    settings: &DaemonSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn DatabaseHandler>> {
    let Some(database_url) = settings.database_url.clone() else {
        warn!("no database URL configured; mirror state is kept in memory only");
        return Ok(Arc::new(MemoryDatabase::new(clock)));
    };

    let migrate_url = database_url.clone();
    tokio::task::spawn_blocking(move || run_migrations(&migrate_url))
        .await
        .wrap_err("migration task panicked")?
        .wrap_err("failed to apply migrations")?;
    let pool = DbPool::new(PoolConfig::new(database_url))
        .await
        .wrap_err("failed to create database pool")?;
    info!("database migrations applied");
    Ok(Arc::new(DieselDatabaseHandler::new(pool, clock)))
}
