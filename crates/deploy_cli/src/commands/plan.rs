//! Plan command - preview pending changes.

use anyhow::Result;
use clap::Args;
use deploy_core::CoreError;

use super::{resolver, AppContext, PollArgs, StackArgs};

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    #[command(flatten)]
    pub poll: PollArgs,
}

pub async fn execute(args: PlanArgs, ctx: &AppContext) -> Result<()> {
    let resolution = resolver(ctx, &args.poll).resolve(&args.stack.parameters())?;
    println!(
        "📝 Planning {} on {} with {}",
        resolution.stack.name(),
        resolution.target.name(),
        resolution.provisioner_kind()
    );

    resolution
        .provisioner
        .validate()
        .await
        .map_err(CoreError::from)?;
    let plan = resolution.provisioner.plan().await.map_err(CoreError::from)?;

    println!();
    println!("{}", plan.trim_end());
    Ok(())
}
