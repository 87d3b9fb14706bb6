//! Deploy command - create or update a stack's resources.

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use deploy_core::CoreError;
use tracing::info;

use super::{console_sink, format_elapsed, print_outputs, resolver, AppContext, PollArgs, StackArgs};

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    #[command(flatten)]
    pub poll: PollArgs,

    /// Stream backend progress while it runs
    #[arg(long)]
    pub stream: bool,
}

pub async fn execute(args: DeployArgs, ctx: &AppContext) -> Result<()> {
    let started = Instant::now();
    info!("Deploying stack: {}", args.stack.stack);

    let resolution = resolver(ctx, &args.poll).resolve(&args.stack.parameters())?;
    println!(
        "🚀 Deploying {} to {} with {}",
        resolution.stack.name(),
        resolution.target.name(),
        resolution.provisioner_kind()
    );

    resolution.target.validate_credentials(&ctx.session)?;
    resolution
        .provisioner
        .validate()
        .await
        .map_err(CoreError::from)?;

    if !args.stream {
        println!("⏳ Applying, output is shown when the run finishes (use --stream to follow)");
    }
    let sink = args.stream.then(console_sink);
    let outputs = resolution
        .provisioner
        .apply(args.stream, sink)
        .await
        .map_err(CoreError::from)?;

    println!();
    println!("✅ Deployment complete");
    print_outputs(&outputs);
    println!("⏱️  Total time: {}", format_elapsed(started.elapsed()));
    Ok(())
}
