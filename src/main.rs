use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

use calipso::commands::settings::{load_settings, SettingsCommand};
use calipso::commands::{dashboard, invoices, settings, AppContext};
use calipso::db::Database;

#[derive(Parser)]
#[command(name = "calipso", version, about = "Capture invoices from images and export them for Calipso")]
struct Cli {
    /// Directory holding the local database
    #[arg(long, env = "CALIPSO_DATA_DIR", default_value = ".calipso", global = true)]
    data_dir: PathBuf,

    /// API key for this run, instead of the stored one
    #[arg(long, env = "CALIPSO_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract an invoice from an image (or every image in a directory) and save it
    Capture(invoices::CaptureArgs),
    /// List saved invoices, newest first
    List {
        /// Filter by supplier or invoice number
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show one invoice in full
    Show {
        id: String,
        /// Write the stored invoice image to this file
        #[arg(long)]
        save_image: Option<PathBuf>,
    },
    /// Delete an invoice
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Export invoices as a spreadsheet and mark them exported
    Export {
        /// Only export invoices matching this supplier or number
        #[arg(short, long)]
        search: Option<String>,
        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Open the file once written
        #[arg(long)]
        open: bool,
    },
    /// Summary cards, monthly totals and recent activity
    Dashboard {
        /// Last month of the chart (YYYY-MM)
        #[arg(long)]
        month: Option<String>,
    },
    /// Ask the AI service for an executive summary of the analytics data
    Insights,
    /// View or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_context(cli: &Cli) -> Result<AppContext> {
    std::fs::create_dir_all(&cli.data_dir)?;
    let db_path = cli.data_dir.join("calipso.sqlite");
    let db = Database::new(db_path)?;
    let settings = load_settings(&db);
    let db = db.with_quota(settings.storage_quota_bytes);
    Ok(AppContext {
        db,
        settings,
        api_key_override: cli.api_key.clone(),
    })
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = open_context(&cli)?;
    match cli.command {
        Command::Capture(args) => invoices::capture(&ctx, args).await,
        Command::List { search } => invoices::list(&ctx, search),
        Command::Show { id, save_image } => invoices::show(&ctx, &id, save_image),
        Command::Delete { id, yes } => invoices::delete(&ctx, &id, yes),
        Command::Export { search, out, open } => invoices::export(&ctx, search, out, open),
        Command::Dashboard { month } => dashboard::run(&ctx, month),
        Command::Insights => dashboard::insights(&ctx).await,
        Command::Settings { command } => settings::run(&ctx, command).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
