//! DeployBot CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Configuration error or missing stack/resource
//! - 3: Validation failure
//! - 4: Credential error
//! - 5: Backend operation failure

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use deploy_cloud::Session;
use deploy_core::CoreError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{AppContext, Cli, Commands};

const DEFAULT_LOG_FILTER: &str = "deploybot=info,deploy_core=info,deploy_iac=info,deploy_cloud=info,warn";
const VERBOSE_LOG_FILTER: &str =
    "deploybot=debug,deploy_core=debug,deploy_iac=debug,deploy_cloud=debug,deploy_runner=debug,info";

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    // Ignore a subscriber installed by an embedding host.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = AppContext {
        stacks_dir: cli.stacks_dir.clone(),
        session: Arc::new(Session::from_env()),
    };

    let result = match cli.command {
        Commands::Deploy(args) => commands::deploy::execute(args, &ctx).await,
        Commands::Destroy(args) => commands::destroy::execute(args, &ctx).await,
        Commands::Plan(args) => commands::plan::execute(args, &ctx).await,
        Commands::Validate(args) => commands::validate::execute(args, &ctx).await,
        Commands::Stacks(args) => commands::stacks::execute(args, &ctx).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<CoreError>()
        .map(CoreError::exit_code)
        .unwrap_or(1)
}
