//! phonedir command-line administrator
//!
//! Every command works directly on the record forest under the configured
//! root; there is no server process.

use anyhow::Result;
use clap::{Parser, Subcommand};
use phonedir_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

use cli::context::CliContext;

#[derive(Parser, Debug)]
#[command(name = "phonedir", version, about = "Corporate phone directory administrator")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: $PHONEDIR_HOME/config.toml)
    #[arg(long, global = true, env = "PHONEDIR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory root, overriding the configured one
    #[arg(long, global = true, env = "PHONEDIR_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create MainMenu.xml under the root
    Init,

    /// List zones from the main menu
    Zones {
        /// Hide the holding zone, as move pickers do
        #[arg(long)]
        destinations: bool,
    },

    /// Manage zones
    Zone {
        #[command(subcommand)]
        action: cli::directory::ZoneAction,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: cli::directory::BranchAction,
    },

    /// Manage localities
    Locality {
        #[command(subcommand)]
        action: cli::directory::LocalityAction,
    },

    /// Manage extensions
    Ext {
        #[command(subcommand)]
        action: cli::directory::ExtAction,
    },

    /// Move extensions between localities
    Move(cli::directory::MoveArgs),

    /// Reconcile a spreadsheet export (department,number,name,locality,zone)
    Import(cli::feed::FeedArgs),

    /// Reconcile a directory-service export (department,number,name,attribute,feed)
    Sync(cli::feed::FeedArgs),

    /// Check referential integrity of the whole tree
    Verify,

    /// Count zones, branches, localities and extensions
    Stats,

    /// Show or write the configuration
    Config(cli::maintenance::ConfigArgs),
}

fn run_command(cli: Cli) -> Result<()> {
    let ctx = CliContext::load(cli.config, cli.root, cli.json)?;
    match cli.command {
        Commands::Init => cli::maintenance::init(&ctx),
        Commands::Zones { destinations } => cli::directory::list_zones(&ctx, destinations),
        Commands::Zone { action } => cli::directory::run_zone(&ctx, action),
        Commands::Branch { action } => cli::directory::run_branch(&ctx, action),
        Commands::Locality { action } => cli::directory::run_locality(&ctx, action),
        Commands::Ext { action } => cli::directory::run_ext(&ctx, action),
        Commands::Move(args) => cli::directory::run_move(&ctx, args),
        Commands::Import(args) => cli::feed::run_import(&ctx, args),
        Commands::Sync(args) => cli::feed::run_sync(&ctx, args),
        Commands::Verify => cli::maintenance::verify(&ctx),
        Commands::Stats => cli::maintenance::stats(&ctx),
        Commands::Config(args) => cli::maintenance::config(&ctx, args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.json;

    let _log_guard = match init_logging(LogConfig {
        app_name: "phonedir",
        verbose: cli.verbose,
        json_output: json_mode,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: logging disabled: {:#}", err);
            None
        }
    };

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
