use fleetroll_core::ControlPlane;
use fleetroll_rotation::RotationEngine;

use super::Context;

pub async fn run(ctx: &Context, stack: &str, json: bool) -> anyhow::Result<()> {
    let stack = ctx.cloud.describe_stack(stack).await?;
    let engine = RotationEngine::new(
        ctx.cloud.clone(),
        ctx.shell(),
        ctx.sink.clone(),
        ctx.config.rotation.clone(),
    );

    let report = engine.rotate_stack(&stack, &ctx.validator()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
