//! Graph command
//!
//! Prints the unit dependency graph as Graphviz DOT, as apply waves, or as
//! JSON.

use super::CommandContext;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde_json::json;

/// Graph rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GraphFormat {
    /// Graphviz DOT
    #[default]
    Dot,
    /// Apply waves with each unit's producers
    Text,
    /// Units, edges and waves
    Json,
}

/// Arguments for the graph command
#[derive(Parser, Debug, Clone, Default)]
pub struct GraphArgs {
    /// Output format
    #[arg(long, short = 'f', default_value = "dot")]
    pub format: GraphFormat,
}

impl GraphArgs {
    /// Execute the graph command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let blueprint = match ctx.blueprint() {
            Ok(blueprint) => blueprint,
            Err(e) => return ctx.fail(&e),
        };
        let graph = &blueprint.graph;
        let waves = match graph.waves() {
            Ok(waves) => waves,
            Err(e) => return ctx.fail(&e),
        };

        let format = if ctx.output.is_json() { GraphFormat::Json } else { self.format };
        match format {
            GraphFormat::Dot => print!("{}", graph.to_dot()),
            GraphFormat::Text => {
                for (index, wave) in waves.iter().enumerate() {
                    println!("Wave {}:", index);
                    for id in wave {
                        let deps = graph.direct_dependencies(id);
                        if deps.is_empty() {
                            println!("  {}", id);
                        } else {
                            println!("  {} <- {}", id, deps.join(", "));
                        }
                    }
                }
            }
            GraphFormat::Json => {
                let units: Vec<_> = blueprint
                    .units
                    .iter()
                    .map(|unit| {
                        json!({
                            "id": unit.id,
                            "kind": unit.kind,
                            "module": format!("{}@{}", unit.module.source, unit.module.version),
                            "depends_on": graph.direct_dependencies(&unit.id),
                        })
                    })
                    .collect();
                ctx.output.json(&json!({ "units": units, "waves": waves }))?;
            }
        }

        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_format_parsing() {
        let args = GraphArgs::try_parse_from(["graph", "--format", "text"]).unwrap();
        assert_eq!(args.format, GraphFormat::Text);
        let args = GraphArgs::try_parse_from(["graph"]).unwrap();
        assert_eq!(args.format, GraphFormat::Dot);
    }
}
