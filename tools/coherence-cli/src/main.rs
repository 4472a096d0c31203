//! Coherence CLI - Operator tool for the coherence runtime.
//!
//! Commands:
//! - `coherence init` - Create the coherence tables
//! - `coherence published show` - Inspect a published content row
//! - `coherence form get|put` - Read or write a form document
//! - `coherence lease show|break` - Inspect or clear a build lease

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{FormArgs, InitArgs, LeaseArgs, PublishedArgs};

/// Coherence CLI - Inspect and operate the coherence datastore
#[derive(Parser)]
#[command(name = "coherence")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the coherence tables
    Init(InitArgs),

    /// Inspect published content
    Published(PublishedArgs),

    /// Read or write form documents
    Form(FormArgs),

    /// Inspect or break build leases
    Lease(LeaseArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let output = output::Output::new(cli.verbose, cli.json);

    let ctx = match context::Context::load(cli.config.as_deref(), output.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            output.error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::run(args, &ctx).await,
        Commands::Published(args) => commands::published::run(args, &ctx).await,
        Commands::Form(args) => commands::form::run(args, &ctx).await,
        Commands::Lease(args) => commands::lease::run(args, &ctx).await,
    };

    match result {
        Ok(code) if code != 0 => std::process::exit(code),
        Ok(_) => Ok(()),
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
