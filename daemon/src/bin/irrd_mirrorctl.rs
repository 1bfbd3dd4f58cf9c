//! Operator controls for mirrored and published sources.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mockable::DefaultClock;
use tokio::runtime::Builder;

use irrd_mirror::control::{
    client_clear_known_keys, force_reload, generate_private_key_pem, server_public_keys,
};
use irrd_mirror::domain::SourceConfig;
use irrd_mirror::outbound::persistence::{DbPool, DieselDatabaseHandler, PoolConfig};
use irrd_mirror::settings::SourceRegistry;

const DEFAULT_SOURCES_PATH: &str = "/etc/irrd-mirror/sources.json";

/// `irrd-mirrorctl` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "irrd-mirrorctl",
    about = "Inspect and steer NRTM mirroring of IRR sources",
    version
)]
struct CliArgs {
    /// Path of the JSON source registry. Falls back to `IRRD_MIRROR_SOURCES_PATH`.
    #[arg(long = "sources", value_name = "path", global = true)]
    sources_path: Option<PathBuf>,
    /// Database connection URL. Falls back to `IRRD_MIRROR_DATABASE_URL`.
    #[arg(long = "database-url", value_name = "url", global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reload the source from scratch on its next run.
    ForceReload { source: String },
    /// Forget signing keys learned by an NRTM v4 client source.
    ClientClearKnownKeys { source: String },
    /// Print the public keys an NRTM v4 server source signs with.
    ServerShowPublicKey { source: String },
    /// Print a new Ed25519 private key as PKCS#8 PEM.
    GeneratePrivateKey,
}

fn main() -> io::Result<()> {
    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    if let Command::GeneratePrivateKey = args.command {
        let pem = generate_private_key_pem().map_err(io::Error::other)?;
        print!("{}", pem.as_str());
        return Ok(());
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: CliArgs) -> io::Result<()> {
    let registry = load_registry(args.sources_path)?;
    match args.command {
        Command::ForceReload { source } => {
            let source = find_source(&registry, &source)?;
            let database = connect(args.database_url).await?;
            force_reload(&database, &source.name)
                .await
                .map_err(io::Error::other)?;
            println!("force reload scheduled for {}", source.name);
        }
        Command::ClientClearKnownKeys { source } => {
            let source = find_source(&registry, &source)?;
            let database = connect(args.database_url).await?;
            let cleared = client_clear_known_keys(&database, source)
                .await
                .map_err(io::Error::other)?;
            if cleared {
                println!("known keys cleared for {}", source.name);
            } else {
                println!("{} has no client state; nothing to clear", source.name);
            }
        }
        Command::ServerShowPublicKey { source } => {
            let source = find_source(&registry, &source)?;
            let keys = server_public_keys(source).map_err(io::Error::other)?;
            println!("Current public key:\n{}", keys.current);
            if let Some(next) = keys.next {
                println!("Next public key:\n{next}");
            }
        }
        Command::GeneratePrivateKey => {}
    }
    Ok(())
}

fn load_registry(explicit: Option<PathBuf>) -> io::Result<SourceRegistry> {
    let path = explicit
        .or_else(|| env::var_os("IRRD_MIRROR_SOURCES_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCES_PATH));
    SourceRegistry::from_file(&path).map_err(|error| {
        io::Error::other(format!("load sources from '{}': {error}", path.display()))
    })
}

fn find_source<'a>(registry: &'a SourceRegistry, name: &str) -> io::Result<&'a SourceConfig> {
    registry.find(name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("unknown source: {name}"),
        )
    })
}

async fn connect(explicit: Option<String>) -> io::Result<DieselDatabaseHandler> {
    let database_url = resolve_database_url(explicit)?;
    let pool = DbPool::new(PoolConfig::new(database_url).with_max_size(1))
        .await
        .map_err(|error| io::Error::other(format!("create database pool: {error}")))?;
    Ok(DieselDatabaseHandler::new(pool, Arc::new(DefaultClock)))
}

fn resolve_database_url(explicit: Option<String>) -> io::Result<String> {
    let value = match explicit {
        Some(value) => value,
        None => env::var("IRRD_MIRROR_DATABASE_URL").map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "database URL missing: set --database-url or IRRD_MIRROR_DATABASE_URL",
            )
        })?,
    };
    if value.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "database URL must not be empty",
        ));
    }
    Ok(value)
}
