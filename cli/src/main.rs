mod commands;
mod logging;
mod notifier;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use billflow::db::default_database_path;
use billflow::{load_config, Config, Pipeline, SqliteStore, WorkflowStore};

use logging::LogFormat;
use notifier::PrintNotifier;

/// Invoice extraction with confidence routing and resumable human review.
#[derive(Parser)]
#[command(name = "billflow", version, about = "Invoice extraction and approval pipeline")]
struct Cli {
    /// Config file (JSON or YAML). Built-in defaults when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// SQLite file holding checkpoints and resume tokens
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process invoice files or directories of invoices
    Process {
        /// Files or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Continue a suspended workflow with a reviewer decision
    Resume {
        /// Resume token from the review request
        token: String,
        #[command(subcommand)]
        action: commands::resume::ActionArg,
    },

    /// List the checkpoints recorded for a workflow
    Checkpoints {
        workflow_id: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] billflow::ConfigError),

    #[error(transparent)]
    Database(#[from] billflow::DatabaseError),

    #[error("No database path given and no home directory to default to")]
    NoDatabasePath,

    #[error("Failed to create runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Everything a command needs, built once from the global flags.
pub(crate) struct AppContext {
    pub config: Config,
    pub pipeline: Pipeline,
}

fn build_context(cli: &Cli) -> Result<AppContext, CliError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    let db_path = cli
        .database
        .clone()
        .or_else(|| config.database.path.as_ref().map(PathBuf::from))
        .or_else(default_database_path)
        .ok_or(CliError::NoDatabasePath)?;
    tracing::debug!(path = %billflow::sanitize::redact_path(&db_path), "Opening database");

    let store: Arc<dyn WorkflowStore> = Arc::new(SqliteStore::open(&db_path)?);
    let pipeline = Pipeline::new(&config, store, Arc::new(PrintNotifier))?;

    Ok(AppContext { config, pipeline })
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            eprintln!("error: {}", e);
            1
        }
    };
    process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, CliError> {
    let context = build_context(&cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let code = runtime.block_on(async move {
        match cli.command {
            Commands::Process { paths } => commands::process::run(&context, &paths).await,
            Commands::Resume { token, action } => {
                commands::resume::run(&context, &token, action).await
            }
            Commands::Checkpoints { workflow_id } => {
                commands::checkpoints::run(&context, &workflow_id).await
            }
        }
    });
    Ok(code)
}
