//! Plan command
//!
//! Computes and prints what `apply` (or `destroy`) would do, without calling
//! the provider.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use eksform::plan::Plan;

/// Arguments for the plan command
#[derive(Parser, Debug, Clone, Default)]
pub struct PlanArgs {
    /// Plan the destruction of every recorded unit
    #[arg(long)]
    pub destroy: bool,

    /// Exit with 2 when the plan has changes
    #[arg(long)]
    pub detailed_exitcode: bool,
}

impl PlanArgs {
    /// Execute the plan command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let plan = match self.compute(ctx) {
            Ok(plan) => plan,
            Err(e) => return ctx.fail(&e),
        };

        if ctx.output.is_json() {
            ctx.output.json(&plan.to_json())?;
        } else {
            ctx.output
                .banner(if self.destroy { "EKSFORM PLAN (DESTROY)" } else { "EKSFORM PLAN" });
            ctx.output.plan(&plan);
        }

        if self.detailed_exitcode && plan.has_changes() {
            Ok(2)
        } else {
            Ok(0)
        }
    }

    fn compute(&self, ctx: &CommandContext) -> eksform::Result<Plan> {
        let state = ctx.open_state()?;
        if self.destroy {
            return Plan::destroy(&state.snapshot());
        }
        let blueprint = ctx.blueprint()?;
        Plan::compute(&blueprint, &state.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_args_parsing() {
        let args = PlanArgs::try_parse_from(["plan", "--destroy", "--detailed-exitcode"]).unwrap();
        assert!(args.destroy);
        assert!(args.detailed_exitcode);
    }
}
