//! Destroy command - remove a stack's resources.

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use deploy_core::CoreError;
use tracing::info;

use super::{console_sink, format_elapsed, resolver, AppContext, PollArgs, StackArgs};

#[derive(Args, Debug)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    #[command(flatten)]
    pub poll: PollArgs,

    /// Stream backend progress while it runs
    #[arg(long)]
    pub stream: bool,
}

pub async fn execute(args: DestroyArgs, ctx: &AppContext) -> Result<()> {
    let started = Instant::now();
    info!("Destroying stack: {}", args.stack.stack);

    let resolution = resolver(ctx, &args.poll).resolve(&args.stack.parameters())?;
    println!(
        "🗑️  Destroying {} on {} with {}",
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

    let sink = args.stream.then(console_sink);
    resolution
        .provisioner
        .destroy(args.stream, sink)
        .await
        .map_err(CoreError::from)?;

    println!();
    println!("✅ Stack destroyed");
    println!("⏱️  Total time: {}", format_elapsed(started.elapsed()));
    Ok(())
}
