//! orgmacs - run Org exports through a dedicated Emacs daemon.
//!
//! Starts a private daemon, streams the document over `emacsclient` stdin,
//! prints the exporter output on stdout and stops the daemon again. Logs go
//! to stderr so stdout carries only the exported artifact.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orgmacs::emacs::framing::org_export_program;
use orgmacs::org::{self, Initialization};
use orgmacs::{atom, list, Emacs, EmacsConfig};

#[derive(Parser)]
#[command(name = "orgmacs")]
#[command(about = "Evaluate Org exports in a dedicated Emacs daemon", version)]
struct Cli {
    /// JSON config file (ORGMACS_* variables still override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export an Org document and print the result
    Export {
        /// Org file to export (stdin when omitted or "-")
        file: Option<PathBuf>,

        /// Feature to require first, as FEATURE or FEATURE=PATH (repeatable)
        #[arg(short, long = "require", value_name = "FEATURE")]
        requires: Vec<String>,

        /// Command run in the Org buffer to produce the output
        #[arg(short, long, default_value = "org-svelte-export-as-svelte")]
        exporter: String,

        /// Emacs Lisp file loaded before exporting (repeatable)
        #[arg(long = "init", value_name = "FILE")]
        init_files: Vec<PathBuf>,

        /// Glob of Org files whose IDs are registered before exporting (repeatable)
        #[arg(long = "id-location", value_name = "GLOB")]
        id_locations: Vec<String>,
    },

    /// Print the daemon's Emacs version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "orgmacs=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EmacsConfig::load(path)?,
        None => EmacsConfig::from_env(),
    };

    let emacs = Emacs::new(config);
    emacs
        .startup()
        .await
        .context("Failed to start Emacs daemon")?;

    let result = run(&emacs, cli.command).await;
    emacs.shutdown().await;

    let output = result?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;

    Ok(())
}

async fn run(emacs: &Emacs, command: Commands) -> Result<String> {
    match command {
        Commands::Export {
            file,
            requires,
            exporter,
            init_files,
            id_locations,
        } => {
            let document = read_document(file.as_ref())?;
            let exporter = atom(exporter).context("Invalid exporter name")?;

            let mut init_forms = Vec::with_capacity(init_files.len());
            for path in &init_files {
                init_forms.push(org::load_file(&org::absolute(path)?));
            }
            Initialization::new()
                .forms(init_forms)
                .id_locations(org::expand_id_locations(&id_locations)?)
                .run(emacs)
                .await
                .context("Initialization failed")?;

            let mut request = emacs.request();
            for spec in &requires {
                let (feature, path) = match spec.split_once('=') {
                    Some((feature, path)) => (feature, Some(path)),
                    None => (spec.as_str(), None),
                };
                let feature = atom(feature)
                    .with_context(|| format!("Invalid feature in --require {}", spec))?;
                request = request.require(&feature, path);
            }

            request
                .progn([org_export_program(&exporter)])
                .minibuffer(document)
                .run()
                .await
                .context("Export failed")
        }

        Commands::Version => emacs
            .evaluate(&list![atom("princ")?, atom("emacs-version")?], None)
            .await
            .context("Failed to query Emacs version"),
    }
}

fn read_document(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut document = String::new();
            io::stdin()
                .read_to_string(&mut document)
                .context("Failed to read document from stdin")?;
            Ok(document)
        }
    }
}
