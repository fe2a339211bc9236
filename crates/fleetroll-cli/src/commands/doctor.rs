use fleetroll_core::ControlPlane;
use fleetroll_remote::check_connectivity;

use super::Context;

pub async fn run(ctx: &Context, stack: &str) -> anyhow::Result<()> {
    let stack = ctx.cloud.describe_stack(stack).await?;
    let outcome = check_connectivity(&ctx.selector(), &ctx.validator(), &stack).await;

    let mark = if outcome.passed() { "✓" } else { "✗" };
    println!("{mark} {}: {}", outcome.name, outcome.message);
    if let Some(detail) = &outcome.detail {
        for line in detail.lines() {
            println!("    {line}");
        }
    }

    if !outcome.passed() {
        anyhow::bail!("doctor found problems with stack {}", stack.name);
    }
    Ok(())
}
