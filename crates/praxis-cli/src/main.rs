use clap::{Parser, Subcommand};
use praxis_core::clock::SystemClock;
use praxis_core::config::Config;
use praxis_core::evaluation::EvaluationEngine;
use praxis_core::store::PgStore;
use praxis_core::CoreError;
use praxis_server::AppState;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "praxis",
    about = "Internship-management backend — approvals, evaluation trackers, overdue sweep",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Apply pending migrations before binding
        #[arg(long)]
        migrate: bool,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Run the overdue sweep once and exit
    Sweep,

    /// Validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Read the environment, validate, and print the effective configuration
    Check,
}

// ---------------------------------------------------------------------------
// Error funnel — one exit code per failure class
// ---------------------------------------------------------------------------

enum CliError {
    /// Exit 1: missing or invalid configuration.
    Config(anyhow::Error),
    /// Exit 2: database unreachable.
    Database(anyhow::Error),
    /// Exit 3: migrations failed to apply.
    Migration(anyhow::Error),
    /// Exit 1: any other runtime failure.
    Runtime(anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) | CliError::Runtime(_) => 1,
            CliError::Database(_) => 2,
            CliError::Migration(_) => 3,
        }
    }

    fn source(&self) -> &anyhow::Error {
        match self {
            CliError::Config(err)
            | CliError::Database(err)
            | CliError::Migration(err)
            | CliError::Runtime(err) => err,
        }
    }
}

fn from_core(err: CoreError) -> CliError {
    if matches!(err, CoreError::Unavailable(_)) {
        CliError::Database(err.into())
    } else {
        CliError::Runtime(err.into())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PRAXIS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Print the full error chain (anyhow's alternate Display).
            eprintln!("error: {:#}", err.source());
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_env().map_err(|err| CliError::Config(err.into()))?;

    match cli.command {
        Commands::Config {
            subcommand: ConfigSubcommand::Check,
        } => {
            println!("configuration ok: {config:?}");
            Ok(())
        }

        Commands::Migrate => {
            let store = connect(&config).await?;
            migrate(&store).await?;
            println!("Migrations applied.");
            Ok(())
        }

        Commands::Sweep => {
            let store = connect(&config).await?;
            let engine = EvaluationEngine::new(Arc::new(store), Arc::new(SystemClock));
            let transitioned = engine.sweep_overdue().await.map_err(from_core)?;
            println!("{transitioned} trackers transitioned to overdue.");
            Ok(())
        }

        Commands::Serve { migrate: apply } => {
            let store = connect(&config).await?;
            if apply {
                migrate(&store).await?;
            }
            let state = AppState::new(
                Arc::new(store),
                Arc::new(SystemClock),
                &config.jwt_secret,
                config.environment.clone(),
            );
            praxis_server::serve(state, config.port)
                .await
                .map_err(CliError::Runtime)
        }
    }
}

async fn connect(config: &Config) -> Result<PgStore, CliError> {
    PgStore::connect(&config.database_url)
        .await
        .map_err(|err| CliError::Database(err.into()))
}

async fn migrate(store: &PgStore) -> Result<(), CliError> {
    store
        .run_migrations()
        .await
        .map_err(|err| CliError::Migration(err.into()))
}
