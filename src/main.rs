//! # Repo Warehouse CLI (`rwh`)
//!
//! The `rwh` binary is the primary interface for Repo Warehouse. It provides
//! commands for database initialization, repository submission, pipeline
//! runs, and status/changelog/document queries.
//!
//! ## Usage
//!
//! ```bash
//! rwh --config ./config/rwh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rwh init` | Create the SQLite database and run schema migrations |
//! | `rwh submit <address>` | Register (or re-queue) a repository |
//! | `rwh process <warehouse>` | Run the pipeline for a warehouse |
//! | `rwh status <warehouse>` | Show lifecycle status and progress |
//! | `rwh changelog <owner> <name>` | Show the last processed commit record |
//! | `rwh list` | List warehouses, newest first |
//! | `rwh docs <warehouse>` | Print the generated documents |
//!
//! `<warehouse>` is a repository address or a warehouse id. Query results are
//! printed to stdout as JSON; logs and progress go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repo_warehouse::config;
use repo_warehouse::coordinator::PipelineCoordinator;
use repo_warehouse::db;
use repo_warehouse::generation;
use repo_warehouse::lifecycle::SubmitOptions;
use repo_warehouse::migrate;
use repo_warehouse::progress::ProgressMode;
use repo_warehouse::service::{Reply, WarehouseService, WarehouseStatusView};
use repo_warehouse::sqlite_store::SqliteStore;
use repo_warehouse_core::models::{Credentials, ReferenceKind, RepositoryReference, WarehouseStatus};

/// Repo Warehouse CLI: repository ingestion and documentation pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rwh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rwh",
    about = "Repo Warehouse: repository ingestion and documentation pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rwh.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Git,
    Local,
}

/// Credentials for a private remote. Used for this invocation only.
#[derive(clap::Args)]
struct CredentialArgs {
    #[arg(long)]
    username: Option<String>,

    /// Password or access token.
    #[arg(long, env = "RWH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long)]
    email: Option<String>,
}

impl CredentialArgs {
    fn into_credentials(self) -> Option<Credentials> {
        self.username.map(|username| Credentials {
            username,
            password: self.password.unwrap_or_default(),
            email: self.email,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Register a repository, or reset an existing one to Pending.
    ///
    /// Re-submitting an address never creates a second warehouse; branch,
    /// description, and model are updated when given.
    Submit {
        /// Remote URL or local path.
        address: String,

        /// Reference kind. Inferred from the address when omitted.
        #[arg(long = "type", value_enum)]
        kind: Option<KindArg>,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Generation model for this repository.
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        credentials: CredentialArgs,

        /// Run the pipeline right after submitting.
        #[arg(long)]
        process: bool,
    },

    /// Run the pipeline for a warehouse.
    ///
    /// A Completed or Failed warehouse is re-queued first.
    Process {
        /// Repository address or warehouse id.
        warehouse: String,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Show lifecycle status and progress.
    Status {
        /// Repository address or warehouse id.
        warehouse: String,
    },

    /// Show the last processed commit record of a repository.
    Changelog { owner: String, name: String },

    /// List warehouses, newest first.
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },

    /// Print the documents generated by the last run.
    Docs {
        /// Repository address or warehouse id.
        warehouse: String,

        /// Print JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print a reply as JSON; returns whether it was a success.
fn emit<T: Serialize>(reply: &Reply<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(reply)?);
    Ok(reply.is_ok())
}

async fn run_pipeline(
    service: &WarehouseService,
    warehouse: &str,
    credentials: Option<Credentials>,
) -> Result<bool> {
    let view = match service.get_warehouse_status(warehouse).await {
        Reply::Ok(view) => view,
        other => return emit(&other),
    };

    let coordinator = service.coordinator();
    let outcome = async {
        if view.status != WarehouseStatus::Pending {
            coordinator.requeue(&view.id).await?;
        }
        coordinator.process_with(&view.id, credentials).await
    }
    .await;

    match outcome {
        Ok(done) => {
            let reply = Reply::Ok(WarehouseStatusView::from(&done));
            emit(&reply)?;
            Ok(done.status == WarehouseStatus::Completed)
        }
        Err(e) => emit::<()>(&Reply::Error {
            error: e.to_string(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let mode = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let pool = db::connect(&cfg).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let generation = generation::create_factory(&cfg.generation)?;
    let coordinator =
        PipelineCoordinator::new(&cfg, store, generation)?.with_reporter(mode.reporter());
    let service = WarehouseService::new(Arc::new(coordinator));

    let ok = match cli.command {
        Commands::Init => true,
        Commands::Submit {
            address,
            kind,
            branch,
            description,
            model,
            credentials,
            process,
        } => {
            let kind = kind.map(|k| match k {
                KindArg::Git => ReferenceKind::Remote,
                KindArg::Local => ReferenceKind::Local,
            });
            let credentials = credentials.into_credentials();
            let reference = RepositoryReference::new(address, kind)
                .with_branch(branch)
                .with_credentials(credentials.clone());
            let options = SubmitOptions { description, model };

            let reply = service.submit_warehouse(&reference, &options).await;
            match (process, reply) {
                (true, Reply::Ok(submitted)) => {
                    run_pipeline(&service, &submitted.id, credentials).await?
                }
                (_, reply) => emit(&reply)?,
            }
        }
        Commands::Process {
            warehouse,
            credentials,
        } => run_pipeline(&service, &warehouse, credentials.into_credentials()).await?,
        Commands::Status { warehouse } => emit(&service.get_warehouse_status(&warehouse).await)?,
        Commands::Changelog { owner, name } => emit(&service.get_change_log(&owner, &name).await)?,
        Commands::List { page, page_size } => {
            emit(&service.list_warehouses(page, page_size).await)?
        }
        Commands::Docs { warehouse, json } => {
            let reply = service.list_documents(&warehouse).await;
            match reply {
                Reply::Ok(docs) if !json => {
                    for doc in &docs {
                        println!("<!-- {} -->\n# {}\n\n{}\n", doc.path, doc.name, doc.content);
                    }
                    true
                }
                other => emit(&other)?,
            }
        }
    };

    pool.close().await;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
