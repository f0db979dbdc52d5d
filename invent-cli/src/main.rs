//! invent-cli: build flows from the command line
//!
//! # Subcommands
//! - `build <prompt>`: generate a flow from a natural-language description
//! - `scratch`       : create an empty "Untitled" flow
//!
//! Ctrl-C aborts the in-flight request instead of merely abandoning it.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use invent_core::{
    Flow, IgnoreReason, InventConfig, InventOrchestrator, Notification, NotificationKind,
    Notifier, ProjectContext, StartOutcome,
};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "invent-cli", version, about = "Build flows with Invent")]
struct Cli {
    /// Config file (TOML); missing files fall back to defaults + env
    #[arg(short, long, default_value = "invent.toml")]
    config: String,

    /// Project the flow is created in
    #[arg(long, env = "INVENT_PROJECT_ID")]
    project: String,

    /// User on whose behalf generation runs
    #[arg(long, env = "INVENT_USER_ID", default_value = "cli")]
    user: String,

    /// Folder to create the flow in
    #[arg(long)]
    folder: Option<String>,

    /// Print the resulting flow as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Describe a task and let Invent build the flow
    Build {
        /// Natural-language description of the task
        prompt: String,
    },

    /// Start from an empty flow
    Scratch,
}

/// Prints notifications to stderr so stdout stays machine-readable.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notification: Notification) {
        let marker = match notification.kind {
            NotificationKind::Success => "✅",
            NotificationKind::Error => "❌",
        };
        eprintln!("{} {}: {}", marker, notification.title, notification.description);
    }
}

fn print_flow(flow: &Flow, json: bool) {
    if json {
        match serde_json::to_string_pretty(flow) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("invent-cli: failed to serialize flow: {}", e),
        }
    } else {
        println!("{}\t{}", flow.id, flow.display_name());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = InventConfig::load(&cli.config)?;
    let context = ProjectContext::new(cli.project.clone(), cli.user.clone());

    let json = cli.json;
    let mut orchestrator = InventOrchestrator::from_config(&config)?
        .with_notifier(Arc::new(StderrNotifier))
        .on_success(move |flow| print_flow(flow, json));

    if let Some(folder) = cli.folder.clone() {
        orchestrator = orchestrator.with_folder_resolver(move || {
            let folder = folder.clone();
            async move { Some(folder) }
        });
    }

    let orchestrator = Arc::new(orchestrator);

    let interrupt = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight request");
            interrupt.cancel();
            interrupt.cancel_scratch();
        }
    });

    let outcome = match cli.command {
        Commands::Build { prompt } => orchestrator.submit(&context, prompt).await,
        Commands::Scratch => orchestrator.create_from_scratch(&context).await,
    };

    match outcome {
        StartOutcome::Completed(_) => Ok(()),
        StartOutcome::Ignored(IgnoreReason::BlankPrompt) => {
            eprintln!("invent-cli: prompt must not be blank");
            std::process::exit(2);
        }
        StartOutcome::Ignored(IgnoreReason::AlreadyPending) => {
            eprintln!("invent-cli: a request is already in flight");
            std::process::exit(2);
        }
        StartOutcome::Failed(e) => {
            eprintln!("invent-cli: {}", e);
            std::process::exit(1);
        }
    }
}
