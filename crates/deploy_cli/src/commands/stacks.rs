//! Stacks command - list available stacks.

use anyhow::Result;
use clap::Args;
use deploy_core::StackCatalog;

use super::AppContext;

#[derive(Args, Debug)]
pub struct StacksArgs {
    /// Print the listing as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StacksArgs, ctx: &AppContext) -> Result<()> {
    let stacks = StackCatalog::new(&ctx.stacks_dir).list()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stacks)?);
        return Ok(());
    }

    if stacks.is_empty() {
        println!("No stacks found in {}", ctx.stacks_dir.display());
        return Ok(());
    }

    println!("📦 Available stacks:");
    for stack in &stacks {
        let provisioners: Vec<&str> = stack.provisioners.iter().map(|p| p.as_str()).collect();
        println!(
            "   {} (target: {}, provisioners: {}, default: {})",
            stack.name,
            stack.target,
            provisioners.join(", "),
            stack.default_provisioner
        );
        if let Some(description) = &stack.description {
            println!("      {}", description);
        }
    }
    Ok(())
}
