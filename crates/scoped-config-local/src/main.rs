use clap::Parser;
use scoped_config_core::ScopeType;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scoped_config_local::config::{Command, Config};
use scoped_config_local::{JsonFileStore, ScopedStore};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only values
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = Config::parse();
    let paths = config.store_paths()?;

    info!("Opening {} store", config.store);
    info!("  Document: {}", paths.document.display());
    info!("  Lock: {} (enabled: {})", paths.lock.display(), !config.no_lock);

    let store = ScopedStore::open(&paths, config.lock_options(), config.plugin_id.clone());
    run(&store, config.command).await
}

async fn run(store: &ScopedStore<JsonFileStore>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Get { key, scope } => {
            match store.get(&key, &scope.context()).await? {
                Some(value) => print_json(&value)?,
                None => anyhow::bail!("{} is not set", key),
            }
        }
        Command::Set { key, value, scope } => {
            require_plugin_id(store, scope.target()?.is_some())?;
            let value = parse_value(&value);
            match scope.target()? {
                None => store.set_global(&key, value).await?,
                Some((ScopeType::Item, id)) => store.set_item(id, &key, value).await?,
                Some((ScopeType::Folder, id)) => store.set_folder(id, &key, value).await?,
                Some((ScopeType::Library, id)) => store.set_library(id, &key, value).await?,
            }
        }
        Command::SetDefault { key, value } => {
            let effective = store.set_default(&key, parse_value(&value)).await?;
            print_json(&effective)?;
        }
        Command::Remove { key, scope } => {
            require_plugin_id(store, scope.target()?.is_some())?;
            let removed = match scope.target()? {
                None => store.remove_global(&key).await?,
                Some((ScopeType::Item, id)) => store.remove_item(id, &key).await?,
                Some((ScopeType::Folder, id)) => store.remove_folder(id, &key).await?,
                Some((ScopeType::Library, id)) => store.remove_library(id, &key).await?,
            };
            if removed.is_none() {
                anyhow::bail!("{} was not set", key);
            }
        }
        Command::Dump => {
            print_json(&Value::Object(store.get_raw().await?))?;
        }
        Command::Key { scope, id, key } => {
            require_plugin_id(store, true)?;
            println!("{}", store.build_key(scope, &id, &key));
        }
        Command::Entries { scope, id } => {
            require_plugin_id(store, true)?;
            let entries = store.entries_for(scope, &id).await?;
            print_json(&Value::Object(entries.into_iter().collect()))?;
        }
    }
    Ok(())
}

/// Scoped keys embed the plugin id, so writing them without one would collide.
fn require_plugin_id(store: &ScopedStore<JsonFileStore>, scoped: bool) -> anyhow::Result<()> {
    if scoped && store.plugin_id().is_empty() {
        anyhow::bail!("--plugin-id is required for scoped keys");
    }
    Ok(())
}

/// Parse a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
