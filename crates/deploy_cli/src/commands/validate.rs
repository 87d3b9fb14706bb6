//! Validate command - check a stack without touching any resources.

use anyhow::Result;
use clap::Args;
use deploy_core::CoreError;

use super::{resolver, AppContext, PollArgs, StackArgs};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Skip the credential check
    #[arg(long)]
    pub skip_credentials: bool,
}

pub async fn execute(args: ValidateArgs, ctx: &AppContext) -> Result<()> {
    println!("📋 Validating stack {}...", args.stack.stack);

    let poll = PollArgs {
        poll_interval_secs: 10,
        poll_timeout_secs: None,
    };
    let resolution = resolver(ctx, &poll).resolve(&args.stack.parameters())?;
    println!("   ✅ Stack configuration");
    println!(
        "   ✅ Target {} ({})",
        resolution.target.name(),
        resolution
            .target
            .project_id()
            .or_else(|| resolution.target.region())
            .unwrap_or_else(|| "local".to_string())
    );

    if args.skip_credentials {
        println!("   ⚠️  Credential check skipped");
    } else {
        resolution.target.validate_credentials(&ctx.session)?;
        println!("   ✅ Credentials");
    }

    resolution
        .provisioner
        .validate()
        .await
        .map_err(CoreError::from)?;
    println!(
        "   ✅ {} definitions in {}",
        resolution.provisioner_kind(),
        resolution.provisioner.working_dir().display()
    );

    println!();
    println!("✅ All validations passed!");
    Ok(())
}
