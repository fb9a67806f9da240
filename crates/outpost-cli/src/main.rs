//! Outpost CLI
//!
//! Command-line interface for Outpost - offline field reports and asset
//! check-in/out.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use outpost_core::{Config, EntityKind};

mod commands;
mod context;
mod output;

use context::App;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "outpost")]
#[command(about = "Outpost - offline-first field operations")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity, queue and storage status
    Status,
    /// List operations waiting to sync
    Queue,
    /// Manage field reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Manage assets
    Asset {
        #[command(subcommand)]
        command: AssetCommands,
    },
    /// Push pending operations to the server
    Flush,
    /// Show a list as it would render, from local state
    View {
        /// Entity kind (report or asset)
        entity: EntityKind,
    },
    /// Fetch a fresh list from the server
    Refetch {
        /// Entity kind (report or asset)
        entity: EntityKind,
    },
    /// Operations that failed to sync
    Failures {
        #[command(subcommand)]
        command: Option<FailureCommands>,
    },
    /// Stay running: flush on reconnect and apply realtime updates
    Watch,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Queue a new report
    #[command(alias = "add")]
    Create {
        /// Report title
        title: String,
        /// Category (e.g. leak, damage, safety)
        #[arg(short, long, default_value = "general")]
        category: String,
        /// Who filed the report
        #[arg(short, long)]
        author: Option<String>,
        /// Free-form description
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Queue changes to a report
    Update {
        /// Report ID (server or temporary)
        id: String,
        #[arg(short = 'T', long)]
        title: Option<String>,
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Queue deletion of a report
    #[command(alias = "rm")]
    Delete {
        /// Report ID (server or temporary)
        id: String,
    },
}

#[derive(Subcommand)]
enum AssetCommands {
    /// Queue a new asset
    #[command(alias = "add")]
    Create {
        /// Asset name
        name: String,
        #[arg(short, long, default_value = "equipment")]
        category: String,
    },
    /// Check an asset back in
    CheckIn {
        /// Asset ID (server or temporary)
        id: String,
    },
    /// Check an asset out
    CheckOut {
        /// Asset ID (server or temporary)
        id: String,
        /// Who is taking it
        #[arg(long)]
        holder: Option<String>,
    },
}

#[derive(Subcommand)]
enum FailureCommands {
    /// List failed operations
    #[command(alias = "ls")]
    List,
    /// Forget a failed operation
    Dismiss {
        /// Operation ID (full or prefix)
        id: String,
    },
    /// Queue a failed operation again
    Retry {
        /// Operation ID (full or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, realtime_url, groups, max_retries, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    init_logging();

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let app = App::open(Config::load()?)?;

    let is_write = matches!(
        &cli.command,
        Commands::Report { .. }
            | Commands::Asset { .. }
            | Commands::Failures {
                command: Some(FailureCommands::Retry { .. })
            }
    );

    let result = match cli.command {
        Commands::Status => commands::status::show(&app, &output).await,
        Commands::Queue => commands::queue::list(&app, &output),
        Commands::Report { command } => handle_report_command(command, &app, &output),
        Commands::Asset { command } => handle_asset_command(command, &app, &output),
        Commands::Flush => commands::flush::run(&app, &output).await,
        Commands::View { entity } => commands::view::show(&app, entity, &output),
        Commands::Refetch { entity } => commands::view::refetch(&app, entity, &output).await,
        Commands::Failures { command } => handle_failure_command(command, &app, &output),
        Commands::Watch => commands::watch::run(&app, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    // Push right away when we can
    if is_write && result.is_ok() {
        app.auto_flush(&output).await;
    }

    result
}

/// Log to stderr so stdout stays clean for --json
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env("OUTPOST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_report_command(command: ReportCommands, app: &App, output: &Output) -> Result<()> {
    match command {
        ReportCommands::Create {
            title,
            category,
            author,
            body,
        } => commands::report::create(app, title, category, author, body, output),
        ReportCommands::Update { id, title, status } => {
            commands::report::update(app, id, title, status, output)
        }
        ReportCommands::Delete { id } => commands::report::delete(app, id, output),
    }
}

fn handle_asset_command(command: AssetCommands, app: &App, output: &Output) -> Result<()> {
    match command {
        AssetCommands::Create { name, category } => {
            commands::asset::create(app, name, category, output)
        }
        AssetCommands::CheckIn { id } => commands::asset::check_in(app, id, output),
        AssetCommands::CheckOut { id, holder } => {
            commands::asset::check_out(app, id, holder, output)
        }
    }
}

fn handle_failure_command(
    command: Option<FailureCommands>,
    app: &App,
    output: &Output,
) -> Result<()> {
    match command {
        Some(FailureCommands::List) | None => commands::failures::list(app, output),
        Some(FailureCommands::Dismiss { id }) => commands::failures::dismiss(app, id, output),
        Some(FailureCommands::Retry { id }) => commands::failures::retry(app, id, output),
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}
