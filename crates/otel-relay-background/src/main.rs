//! Telemetry relay background service: entry point.
//!
//! The service owns the relay configuration, decides which pages may talk to
//! it, and forwards the encoded telemetry those pages send to the OTLP
//! collectors.
//!
//! # Usage
//!
//! ```text
//! otel-relay-background [--settings <FILE>] [--storage <FILE>] [COMMAND]
//!
//! Commands:
//!   serve                         Run the relay (default)
//!   config show                   Print the configuration as editor text
//!   config apply <FILE>           Merge editor text into the configuration
//!   config set-headers <TEXT>     Set collector headers, e.g. 'a:b, "c d":e'
//!   config set-attributes <TEXT>  Set resource attributes
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable               | Description                           |
//! |------------------------|---------------------------------------|
//! | `OTEL_RELAY_SETTINGS`  | Settings TOML file                    |
//! | `OTEL_RELAY_STORAGE`   | Configuration storage document        |
//! | `OTEL_RELAY_LISTEN`    | WebSocket listen address (`serve`)    |
//! | `RUST_LOG`             | Log filter, overrides `log_level`     |
//!
//! # Architecture overview
//!
//! ```text
//! bridge  (JSON over WebSocket)
//!    ↕
//! otel-relay-background  ← this process
//!   application/     gate, route, observe storage, plan injection
//!   infrastructure/
//!     network/       WebSocket listener
//!     storage/       storage document + settings TOML
//!     collector      HTTP POST to the collectors
//!    ↓
//! OTLP collector  (protobuf over HTTP)
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use otel_relay_core::domain::configuration::keys;
use otel_relay_core::serialization::to_editor_text;
use otel_relay_core::{KeyValueParser, OrderedMap, RemainderPolicy, StorageItems};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use otel_relay_background::application::gate_permissions::PermissionGate;
use otel_relay_background::application::observe_storage::StorageObserver;
use otel_relay_background::application::route_telemetry::Router;
use otel_relay_background::infrastructure::collector::HttpCollectorClient;
use otel_relay_background::infrastructure::network::{bind, run_server};
use otel_relay_background::infrastructure::permissions::SettingsPermissions;
use otel_relay_background::infrastructure::storage::settings::{
    load_settings, settings_file_path, ServiceSettings,
};
use otel_relay_background::infrastructure::storage::store::ConfigStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Background service of the telemetry relay.
#[derive(Debug, Parser)]
#[command(
    name = "otel-relay-background",
    about = "Permission gate, channel registry and collector router for the telemetry relay",
    version
)]
struct Cli {
    /// Settings file. Defaults to `settings.toml` in the platform config directory.
    #[arg(long, global = true, env = "OTEL_RELAY_SETTINGS")]
    settings: Option<PathBuf>,

    /// Configuration storage document. Overrides `[storage] path`.
    #[arg(long, global = true, env = "OTEL_RELAY_STORAGE")]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay until Ctrl+C.
    Serve(ServeArgs),

    /// Inspect or edit the stored configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Default, Args)]
struct ServeArgs {
    /// Address the bridge WebSocket listener binds to. Overrides `[network] listen_addr`.
    #[arg(long, env = "OTEL_RELAY_LISTEN")]
    listen: Option<SocketAddr>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the configuration in its editor form.
    Show,
    /// Merge the editor text in FILE into the stored configuration.
    Apply { file: PathBuf },
    /// Set the collector headers from `key:value, ...` text.
    SetHeaders { text: String },
    /// Set the resource attributes from `key:value, ...` text.
    SetAttributes { text: String },
}

impl ServeArgs {
    /// Layers the flags over the settings file values.
    fn apply_to(self, settings: &mut ServiceSettings) {
        if let Some(listen) = self.listen {
            settings.network.listen_addr = listen;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = match cli.settings {
        Some(path) => path,
        None => settings_file_path().context("cannot locate the settings file")?,
    };
    let mut settings = load_settings(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    if let Some(storage) = cli.storage {
        settings.storage.path = Some(storage);
    }

    // `RUST_LOG` wins over the configured level.
    let fallback = settings.service.log_level.clone();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let storage_path = settings.storage_path(settings_path.parent().unwrap_or(Path::new(".")));

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            args.apply_to(&mut settings);
            serve(settings, storage_path).await
        }
        Command::Config(command) => configure(command, &settings, storage_path).await,
    }
}

// ── serve ─────────────────────────────────────────────────────────────────────

async fn serve(settings: ServiceSettings, storage_path: PathBuf) -> anyhow::Result<()> {
    info!(
        "telemetry relay starting: listen={}, storage={}",
        settings.network.listen_addr,
        storage_path.display()
    );

    let store = Arc::new(
        ConfigStore::open(&storage_path)
            .await
            .with_context(|| format!("failed to open storage {}", storage_path.display()))?,
    );
    let collector = HttpCollectorClient::new(settings.collector.request_timeout())
        .context("failed to build the collector HTTP client")?;
    let router = Router::new(Arc::clone(&store), Arc::new(collector));
    let gate = Arc::new(PermissionGate::new(Arc::new(SettingsPermissions::new(
        &settings.permissions,
    ))));

    let observer = StorageObserver::new(Arc::clone(&store), Arc::clone(&router), gate);
    let report = observer
        .refresh_pattern_errors()
        .await
        .context("failed to check the stored match patterns")?;
    info!(
        "{} valid match pattern(s), {} invalid, {} without permission",
        report.valid.len(),
        report.errors.len(),
        report.permission_errors.len()
    );
    let changes = store.subscribe();
    tokio::spawn(observer.run(changes));

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let listener = bind(settings.network.listen_addr).await?;
    run_server(listener, router, running).await?;

    info!("telemetry relay stopped");
    Ok(())
}

// ── config ────────────────────────────────────────────────────────────────────

async fn configure(
    command: ConfigCommand,
    settings: &ServiceSettings,
    storage_path: PathBuf,
) -> anyhow::Result<()> {
    let store = Arc::new(
        ConfigStore::open(&storage_path)
            .await
            .with_context(|| format!("failed to open storage {}", storage_path.display()))?,
    );

    let (change, edited) = match command {
        ConfigCommand::Show => {
            let config = store.configuration().await?;
            println!("{}", to_editor_text(&config)?);
            return Ok(());
        }
        ConfigCommand::Apply { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let change = store
                .apply_editor_text(&text)
                .await
                .with_context(|| format!("{} is not a valid configuration", file.display()))?;
            (change, true)
        }
        ConfigCommand::SetHeaders { text } => {
            let items = single_entry(keys::HEADERS, parse_map(&text)?)?;
            (store.set(items).await?, false)
        }
        ConfigCommand::SetAttributes { text } => {
            let items = single_entry(keys::ATTRIBUTES, parse_map(&text)?)?;
            (store.set(items).await?, false)
        }
    };

    if edited || change.contains(keys::MATCH_PATTERNS) {
        // Same bookkeeping the running service does for a pattern change.
        let collector = HttpCollectorClient::new(settings.collector.request_timeout())?;
        let router = Router::new(Arc::clone(&store), Arc::new(collector));
        let gate = Arc::new(PermissionGate::new(Arc::new(SettingsPermissions::new(
            &settings.permissions,
        ))));
        StorageObserver::new(Arc::clone(&store), router, gate)
            .reconcile(&change)
            .await
            .context("failed to recompute match pattern errors")?;
    }

    println!("{} key(s) changed in {}", change.len(), storage_path.display());
    Ok(())
}

/// Parses user-typed `key:value` text, rejecting anything left unparsed.
fn parse_map(text: &str) -> anyhow::Result<OrderedMap> {
    let outcome = KeyValueParser::new()
        .with_policy(RemainderPolicy::FinalRemainder)
        .parse(text);
    if !outcome.remainder.trim().is_empty() {
        bail!("could not parse `{}`", outcome.remainder);
    }
    Ok(outcome.map)
}

fn single_entry(key: &str, map: OrderedMap) -> anyhow::Result<StorageItems> {
    let mut items = StorageItems::new();
    items.insert(key.to_string(), serde_json::to_value(&map)?);
    Ok(items)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
