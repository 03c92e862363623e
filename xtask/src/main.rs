//! Build automation tasks for the vfs-monitor workspace.
//!
//! Run with: `cargo run -p xtask -- <command>`
//!
//! # Available Commands
//!
//! - `check`: Run all checks (fmt, clippy, test)
//! - `fmt`: Format code with rustfmt
//! - `lint`: Run clippy with all targets
//! - `test`: Run all tests
//! - `bench`: Run the coalescing benchmarks
//! - `build`: Build the `vfs-watch` binary
//! - `clean`: Clean build artifacts
//! - `doc`: Generate documentation

// xtask is a build tool - printing to stderr is expected
#![allow(clippy::print_stderr)]

use std::process::Command;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};

/// Build automation for vfs-monitor
#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for vfs-monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks (fmt --check, clippy, test)
    Check,
    /// Format code with rustfmt
    Fmt {
        /// Check formatting without modifying files
        #[arg(long)]
        check: bool,
    },
    /// Run clippy lints
    Lint {
        /// Automatically fix lint warnings
        #[arg(long)]
        fix: bool,
    },
    /// Run all tests
    Test {
        /// Run tests with release optimizations
        #[arg(long)]
        release: bool,
    },
    /// Run the coalescing benchmarks
    Bench,
    /// Build the vfs-watch binary
    Build {
        /// Build in debug mode
        #[arg(long)]
        debug: bool,
    },
    /// Clean build artifacts
    Clean,
    /// Generate documentation
    Doc {
        /// Open in browser after building
        #[arg(long)]
        open: bool,
    },
}

/// Workspace root: the parent of this crate's manifest directory.
fn workspace_root() -> Result<Utf8PathBuf> {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Utf8Path::to_owned)
        .context("xtask must live inside the workspace")
}

/// Runs `cargo <args>` at the workspace root.
fn cargo(args: &[&str]) -> Result<()> {
    let root = workspace_root()?;
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_owned());

    eprintln!("$ cargo {}", args.join(" "));
    let status = Command::new(&cargo)
        .args(args)
        .current_dir(&root)
        .status()
        .with_context(|| format!("failed to run {cargo}"))?;

    if !status.success() {
        bail!("cargo {} failed with {status}", args.join(" "));
    }
    Ok(())
}

fn fmt(check: bool) -> Result<()> {
    if check {
        cargo(&["fmt", "--all", "--", "--check"])
    } else {
        cargo(&["fmt", "--all"])
    }
}

fn lint(fix: bool) -> Result<()> {
    let mut args = vec!["clippy", "--workspace", "--all-targets"];
    if fix {
        args.extend(["--fix", "--allow-dirty"]);
    }
    args.extend(["--", "-D", "warnings"]);
    cargo(&args)
}

fn test(release: bool) -> Result<()> {
    let mut args = vec!["test", "--workspace"];
    if release {
        args.push("--release");
    }
    cargo(&args)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt(true)?;
            lint(false)?;
            test(false)
        }
        Commands::Fmt { check } => fmt(check),
        Commands::Lint { fix } => lint(fix),
        Commands::Test { release } => test(release),
        Commands::Bench => cargo(&["bench", "-p", "vfs-monitor"]),
        Commands::Build { debug } => {
            if debug {
                cargo(&["build", "-p", "vfs-cli"])
            } else {
                cargo(&["build", "-p", "vfs-cli", "--release"])
            }
        }
        Commands::Clean => cargo(&["clean"]),
        Commands::Doc { open } => {
            let mut args = vec!["doc", "--workspace", "--no-deps"];
            if open {
                args.push("--open");
            }
            cargo(&args)
        }
    }
}
