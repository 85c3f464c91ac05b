//! Validate command
//!
//! Plans the stack without reading state: naming, CIDR allocation, sizing,
//! access entry lockout and the dependency graph are all checked.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use serde_json::json;

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let blueprint = match ctx.blueprint() {
            Ok(blueprint) => blueprint,
            Err(e) => return ctx.fail(&e),
        };

        let failed = self.strict && !blueprint.warnings.is_empty();
        if ctx.output.is_json() {
            ctx.output.json(&json!({
                "valid": !failed,
                "units": blueprint.units.len(),
                "dependencies": blueprint.graph.edge_count(),
                "warnings": blueprint.warnings,
            }))?;
        } else {
            for warning in &blueprint.warnings {
                ctx.output.warning(warning);
            }
            if failed {
                ctx.output.error("Validation failed: warnings present in strict mode");
            } else {
                ctx.output.line(&format!(
                    "Stack is valid: {} units, {} dependencies.",
                    blueprint.units.len(),
                    blueprint.graph.edge_count()
                ));
            }
        }

        Ok(if failed { 4 } else { 0 })
    }
}
