use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use charon_dns::{Config, Store};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "charon", version, about = "Caching DNS resolver with local zones and upstream forwarding")]
struct Args {
    /// Read settings from a SQLite settings store instead of a config file
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Flat JSON configuration file
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<Config> {
    if let Some(db) = &args.db {
        return load_settings_db(db);
    }
    if let Some(path) = &args.config {
        return load_config_file(path);
    }
    Ok(Config::default())
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid config file {}", path.display()))
}

/// Read the `settings` key/value table and deserialize it through the
/// same serde struct the JSON config file uses.
fn load_settings_db(path: &Path) -> Result<Config> {
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("failed to open settings store {}", path.display()))?;
    conn.execute_batch("CREATE TABLE IF NOT EXISTS settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);")?;

    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut map = serde_json::Map::new();
    for row in rows {
        let (key, value) = row?;
        map.insert(key, coerce_setting(&value));
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .with_context(|| format!("invalid settings in {}", path.display()))
}

/// Settings values are stored as TEXT; numbers and booleans must come
/// back typed for the config deserializer.
fn coerce_setting(value: &str) -> serde_json::Value {
    if let Ok(n) = value.parse::<i64>() {
        return n.into();
    }
    if let Ok(b) = value.parse::<bool>() {
        return b.into();
    }
    serde_json::Value::String(value.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if config.verbose {
                    "info,charon=debug,charon_dns=debug".parse().unwrap()
                } else {
                    "info".parse().unwrap()
                }
            }),
        )
        .init();

    info!("charon starting (listen {}:{}, upstream {:?})", config.listen_addr, config.listen_port, config.upstream);

    let mut store = Store::new(config.max_cache_entries);
    if !config.zone_file.is_empty() {
        let count = store.load_zone_file(Path::new(&config.zone_file))?;
        info!("loaded {} records from {}", count, config.zone_file);
    }

    charon_dns::server::run(config, store).await
}
