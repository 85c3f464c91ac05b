//! Apply command
//!
//! Plans the stack against recorded state and reconciles every changed unit
//! through the provider, wave by wave.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use eksform::engine::{ApplyReport, Engine};
use eksform::plan::Plan;
use serde_json::json;
use tracing::warn;

/// Arguments for the apply command
#[derive(Parser, Debug, Clone, Default)]
pub struct ApplyArgs {
    /// Only print the plan
    #[arg(long)]
    pub dry_run: bool,
}

impl ApplyArgs {
    /// Execute the apply command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let prepared = (|| {
            let blueprint = ctx.blueprint()?;
            let state = ctx.open_state()?;
            let plan = Plan::compute(&blueprint, &state.snapshot())?;
            let engine = ctx.engine(blueprint.context.provider.clone(), state);
            Ok::<_, eksform::Error>((plan, engine))
        })();
        let (plan, engine) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return ctx.fail(&e),
        };

        if !ctx.output.is_json() {
            ctx.output.banner("EKSFORM APPLY");
            ctx.output.plan(&plan);
        }
        if self.dry_run || !plan.has_changes() {
            if ctx.output.is_json() {
                ctx.output.json(&json!({ "plan": plan.to_json(), "report": null }))?;
            }
            return Ok(0);
        }

        let report = match run(&engine, &plan).await {
            Ok(report) => report,
            Err(e) => return ctx.fail(&e),
        };

        if ctx.output.is_json() {
            ctx.output.json(&json!({ "plan": plan.to_json(), "report": report }))?;
        } else {
            ctx.output.section("Reconciling");
            for unit in &report.units {
                ctx.output.unit_result(unit);
            }
            ctx.output.apply_summary(&report, "Apply");
        }
        ctx.output.flush();

        Ok(report.exit_code())
    }
}

/// Run a plan, cancelling on Ctrl-C
pub(crate) async fn run(engine: &Engine, plan: &Plan) -> eksform::Result<ApplyReport> {
    let token = engine.cancellation_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight units");
            token.cancel();
        }
    });
    let result = engine.apply(plan).await;
    watcher.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_args_parsing() {
        let args = ApplyArgs::try_parse_from(["apply", "--dry-run"]).unwrap();
        assert!(args.dry_run);
    }
}
