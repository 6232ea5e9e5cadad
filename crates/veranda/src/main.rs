//! Veranda panel launcher.
//!
//! Configuration comes from `VERANDA_*` environment variables; subcommands
//! drive the store/provisioner/job-engine pipeline directly. Mutating
//! commands start the job worker, wait for the enqueued job to finish, and
//! shut the worker down before exiting.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;

use veranda::config::PanelConfig;
use veranda_logging::LogConfig;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "veranda", about = "Single-node hosting control panel", version)]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage hosted sites
    Site {
        #[command(subcommand)]
        command: SiteCommands,
    },

    /// Inspect provisioning jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show the audit trail
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Summarize panel state
    Status,
}

#[derive(Subcommand, Debug)]
enum SiteCommands {
    /// Create a site and provision its virtual host
    Add {
        /// Site domain, e.g. blog.example.com
        domain: String,

        /// Site root directory on disk
        #[arg(long)]
        root: String,

        /// Runtime: php, node, python, or static
        #[arg(long, default_value = "static")]
        runtime: String,

        /// Actor recorded on the job and the audit trail
        #[arg(long, default_value = "cli")]
        actor: String,

        /// How long to wait for the provisioning job to finish
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,

        #[arg(long)]
        json: bool,
    },

    /// List sites, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show one site by id or domain
    Show {
        site: String,

        #[arg(long)]
        json: bool,
    },

    /// Deprovision a site and delete its record
    Rm {
        /// Site id or domain
        site: String,

        #[arg(long, default_value = "cli")]
        actor: String,

        #[arg(long, default_value_t = 60)]
        wait_secs: u64,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// List jobs, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show one job
    Show {
        job: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(err) = veranda_logging::init_logging(LogConfig {
        verbose: args.verbose,
    }) {
        eprintln!("error: failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let cfg = match PanelConfig::load_from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("invalid configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Commands::Site { command } => match command {
            SiteCommands::Add {
                domain,
                root,
                runtime,
                actor,
                wait_secs,
                json,
            } => {
                cli::site::run_add(
                    cfg,
                    cli::site::AddArgs {
                        domain,
                        root,
                        runtime,
                        actor,
                        wait_secs,
                        json,
                    },
                )
                .await
            }
            SiteCommands::List { limit, json } => cli::site::run_list(cfg, limit, json).await,
            SiteCommands::Show { site, json } => cli::site::run_show(cfg, &site, json).await,
            SiteCommands::Rm {
                site,
                actor,
                wait_secs,
                json,
            } => {
                cli::site::run_rm(
                    cfg,
                    cli::site::RmArgs {
                        site,
                        actor,
                        wait_secs,
                        json,
                    },
                )
                .await
            }
        },
        Commands::Job { command } => match command {
            JobCommands::List { limit, json } => cli::job::run_list(cfg, limit, json).await,
            JobCommands::Show { job, json } => cli::job::run_show(cfg, &job, json).await,
        },
        Commands::Audit { limit, json } => cli::audit::run_list(cfg, limit, json).await,
        Commands::Status => cli::status::run(cfg).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
