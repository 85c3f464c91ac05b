//! Destroy command
//!
//! Deletes every recorded unit in reverse dependency order. The stack file is
//! optional; caller identity falls back to what the context unit recorded.

use super::apply::run;
use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use eksform::error::Error;
use eksform::plan::Plan;
use serde_json::json;

/// Arguments for the destroy command
#[derive(Parser, Debug, Clone, Default)]
pub struct DestroyArgs {
    /// Only print what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

impl DestroyArgs {
    /// Execute the destroy command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let state = match ctx.open_state() {
            Ok(state) => state,
            Err(e) => return ctx.fail(&e),
        };
        let snapshot = state.snapshot();
        let plan = match Plan::destroy(&snapshot) {
            Ok(plan) => plan,
            Err(e) => return ctx.fail(&e),
        };

        if !ctx.output.is_json() {
            ctx.output.banner("EKSFORM DESTROY");
            ctx.output.plan(&plan);
        }
        if self.dry_run || !plan.has_changes() {
            if ctx.output.is_json() {
                ctx.output.json(&json!({ "plan": plan.to_json(), "report": null }))?;
            }
            return Ok(0);
        }

        let provider = match ctx.recorded_provider(&snapshot) {
            Some(provider) => provider,
            None => match ctx.load_stack().and_then(|stack| stack.stack_context()) {
                Ok(context) => context.provider,
                Err(e) => {
                    return ctx.fail(&Error::Config(format!(
                        "state has no context unit and the stack could not be loaded: {}",
                        e
                    )))
                }
            },
        };
        let engine = ctx.engine(provider, state);

        let report = match run(&engine, &plan).await {
            Ok(report) => report,
            Err(e) => return ctx.fail(&e),
        };

        if ctx.output.is_json() {
            ctx.output.json(&json!({ "plan": plan.to_json(), "report": report }))?;
        } else {
            ctx.output.section("Destroying");
            for unit in &report.units {
                ctx.output.unit_result(unit);
            }
            ctx.output.apply_summary(&report, "Destroy");
        }
        ctx.output.flush();

        Ok(report.exit_code())
    }
}
