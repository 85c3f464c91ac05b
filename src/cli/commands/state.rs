//! State command
//!
//! Read-only views of the recorded state.

use super::CommandContext;
use anyhow::Result;
use clap::{Parser, Subcommand};

/// Arguments for the state command
#[derive(Parser, Debug, Clone)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

/// State subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    /// List recorded units
    List,
    /// Show one recorded unit
    Show {
        /// Unit id
        unit: String,
    },
}

impl StateArgs {
    /// Execute the state command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let state = match ctx.open_state() {
            Ok(state) => state,
            Err(e) => return ctx.fail(&e),
        };
        let snapshot = state.snapshot();

        match &self.command {
            StateCommand::List => {
                if ctx.output.is_json() {
                    let ids: Vec<&String> = snapshot.units.keys().collect();
                    ctx.output.json(&ids)?;
                    return Ok(0);
                }
                if snapshot.is_empty() {
                    ctx.output.line(&format!("No units recorded in {}", state.location()));
                    return Ok(0);
                }
                let rows: Vec<Vec<String>> = snapshot
                    .iter()
                    .map(|record| {
                        vec![
                            record.id.clone(),
                            record.kind.to_string(),
                            format!("{}@{}", record.module.name, record.module.version),
                            record.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        ]
                    })
                    .collect();
                ctx.output.table(&["UNIT", "KIND", "MODULE", "UPDATED"], &rows);
                ctx.output.info(&format!("serial {} lineage {}", snapshot.serial, snapshot.lineage));
            }
            StateCommand::Show { unit } => {
                let Some(record) = snapshot.get(unit) else {
                    ctx.output.error(&format!("Unit '{}' is not in state", unit));
                    return Ok(1);
                };
                if ctx.output.is_json() {
                    ctx.output.json(record)?;
                } else {
                    ctx.output.section(&format!("{} ({})", record.id, record.kind));
                    ctx.output.line(&format!(
                        "module: {} {}",
                        record.module.source, record.module.version
                    ));
                    if !record.dependencies.is_empty() {
                        ctx.output
                            .line(&format!("depends on: {}", record.dependencies.join(", ")));
                    }
                    let outputs: Vec<String> = record
                        .outputs
                        .iter()
                        .map(|(key, value)| format!("{} = {}", key, value))
                        .collect();
                    ctx.output.list("outputs", &outputs);
                }
            }
        }
        Ok(0)
    }
}
