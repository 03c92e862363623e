//! CLI entry point for the vfs-monitor service.
//!
//! Watches the given files and directories through a shared [`Monitor`] and
//! prints every delivered change notification.
//!
//! # Usage
//!
//! ```bash
//! vfs-watch [OPTIONS] <PATH>...
//!
//! # Watch a directory and a single file
//! vfs-watch ./src ./Cargo.toml
//!
//! # JSON lines, shorter quiescence interval
//! vfs-watch --json --interval-ms 100 /var/log
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::{WrapErr, bail, eyre};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vfs_core::{BackendKind, MonitorConfig, VfsPath};
use vfs_monitor::{HandleId, Monitor, MonitorEvent, MonitorStats, WatchHandle};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watch files and directories and print coalesced change notifications.
#[derive(Parser)]
#[command(name = "vfs-watch", version, about, long_about = None)]
struct Cli {
    /// Files or directories to watch.
    #[arg(required = true)]
    paths: Vec<Utf8PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, env = "VFS_WATCH_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Quiescence interval before a batch is delivered, in milliseconds.
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Do not start a backend; only fed events would be delivered.
    #[arg(long)]
    feed_only: bool,

    /// Print one JSON object per notification.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

/// One delivered notification, as printed.
#[derive(Debug, Serialize)]
struct Delivery {
    handle: HandleId,
    event: MonitorEvent,
    watched: String,
    changed: String,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn,notify=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds a [`MonitorConfig`] from the config file and CLI overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => MonitorConfig::load(path)
            .wrap_err_with(|| format!("Failed to load config from {path}"))?,
        None => MonitorConfig::default(),
    };

    if let Some(interval_ms) = cli.interval_ms {
        config.interval_ms = interval_ms;
    }
    if cli.feed_only {
        config.backend = BackendKind::None;
    }

    config.validate()?;
    Ok(config)
}

/// Resolves a path argument to an absolute, existing path.
fn resolve_target(path: &Utf8PathBuf) -> color_eyre::Result<(VfsPath, bool)> {
    if !path.exists() {
        bail!("Path does not exist: {path}");
    }
    let absolute = path
        .canonicalize_utf8()
        .map_err(|e| eyre!("Failed to resolve {path}: {e}"))?;
    let is_dir = absolute.is_dir();
    Ok((VfsPath::from(absolute), is_dir))
}

// =============================================================================
// COMMAND IMPLEMENTATION
// =============================================================================

/// Registers every path and prints notifications until interrupted.
///
/// # Errors
///
/// Returns an error if a path cannot be resolved or output fails.
async fn run_watch(cli: &Cli, config: MonitorConfig) -> color_eyre::Result<MonitorStats> {
    let targets = cli
        .paths
        .iter()
        .map(resolve_target)
        .collect::<color_eyre::Result<Vec<_>>>()?;

    let monitor = Monitor::new(config);
    if config.backend != BackendKind::None && !monitor.is_backend_active() {
        tracing::warn!("No change backend available; nothing will be reported");
    }

    // Callbacks run on the dispatch thread; printing happens here.
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let handles: Vec<WatchHandle> = targets
        .into_iter()
        .map(|(path, is_dir)| {
            let tx = tx.clone();
            let callback = move |_: &Monitor,
                                 handle: HandleId,
                                 event: MonitorEvent,
                                 watched: &VfsPath,
                                 changed: &VfsPath| {
                let _ = tx.send(Delivery {
                    handle,
                    event,
                    watched: watched.to_string(),
                    changed: changed.to_string(),
                });
            };
            info!(path = %path, directory = is_dir, "Watching");
            if is_dir {
                monitor.add_directory(path, callback)
            } else {
                monitor.add_file(path, callback)
            }
        })
        .collect();
    drop(tx);

    let stdout = std::io::stdout();

    #[cfg(unix)]
    let mut sigterm = {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())?
    };

    loop {
        #[cfg(unix)]
        let terminate = sigterm.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            delivery = rx.recv() => {
                let Some(delivery) = delivery else { break };
                let mut out = stdout.lock();
                if cli.json {
                    serde_json::to_writer(&mut out, &delivery)?;
                    writeln!(out)?;
                } else {
                    writeln!(out, "{:<8} {} ({})", delivery.event, delivery.changed, delivery.handle)?;
                }
                out.flush()?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    let stats = monitor.stats();
    for handle in handles {
        monitor.remove(handle);
    }
    debug!(?stats, "Monitor released");
    Ok(stats)
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Prints the final monitor counters.
fn print_stats(stats: &MonitorStats, json: bool) -> color_eyre::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    if json {
        serde_json::to_writer(&mut handle, stats)?;
        writeln!(handle)?;
        return Ok(());
    }

    writeln!(handle)?;
    writeln!(handle, "Monitor Summary")?;
    writeln!(handle, "===============")?;
    writeln!(handle, "Watches:            {}", stats.handles)?;
    writeln!(handle, "Queued:             {}", stats.queued)?;
    writeln!(handle, "  Coalesced:        {}", stats.coalesced)?;
    writeln!(handle, "  Superseded:       {}", stats.superseded)?;
    writeln!(handle, "Delivered:          {}", stats.delivered)?;
    writeln!(handle, "  Discarded:        {}", stats.discarded)?;
    writeln!(handle, "  Callback panics:  {}", stats.panicked)?;
    writeln!(handle, "Pending at exit:    {}", stats.pending)?;
    writeln!(
        handle,
        "Backend:            {}",
        if stats.backend_active { "active" } else { "inactive" }
    )?;
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Build configuration and run
    let config = build_config(&cli)?;
    let stats = run_watch(&cli, config).await?;
    print_stats(&stats, cli.json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["vfs-watch", "--interval-ms", "40", "--feed-only", "/tmp"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.interval_ms, 40);
        assert_eq!(config.backend, BackendKind::None);
    }

    #[test]
    fn test_cli_rejects_invalid_interval() {
        let cli = Cli::parse_from(["vfs-watch", "--interval-ms", "0", "/tmp"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_cli_requires_a_path() {
        assert!(Cli::try_parse_from(["vfs-watch"]).is_err());
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = Utf8PathBuf::try_from(dir.path().join("monitor.json")).unwrap();
        std::fs::write(&file, r#"{ "interval_ms": 75, "backend": "none" }"#).unwrap();

        let cli = Cli::parse_from(["vfs-watch", "--config", file.as_str(), "/tmp"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.interval_ms, 75);
        assert_eq!(config.backend, BackendKind::None);
    }

    #[test]
    fn test_resolve_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let file = root.join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let (_, is_dir) = resolve_target(&root).unwrap();
        assert!(is_dir);
        let (path, is_dir) = resolve_target(&file).unwrap();
        assert!(!is_dir);
        assert_eq!(path.name(), Some("a.txt"));
        assert!(resolve_target(&root.join("missing")).is_err());
    }

    #[test]
    fn test_delivery_serializes_as_json_line() {
        let delivery = Delivery {
            handle: HandleId(3),
            event: MonitorEvent::Created,
            watched: "/srv".to_owned(),
            changed: "/srv/a.txt".to_owned(),
        };
        let json = serde_json::to_string(&delivery).unwrap();
        assert!(json.contains(r#""event":"created""#));
        assert!(json.contains(r#""changed":"/srv/a.txt""#));
    }
}
