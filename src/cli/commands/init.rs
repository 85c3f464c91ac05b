//! Init command
//!
//! Writes a sample stack file to start from.

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use eksform::stack::StackConfig;
use std::path::PathBuf;

/// Arguments for the init command
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the stack file
    #[arg(default_value = "stack.yml")]
    pub path: PathBuf,

    /// Namespace label
    #[arg(long, default_value = "acme")]
    pub namespace: String,

    /// Name label
    #[arg(long, default_value = "eks")]
    pub name: String,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        if self.path.exists() && !self.force {
            ctx.output.error(&format!(
                "{} already exists (use --force to overwrite)",
                self.path.display()
            ));
            return Ok(1);
        }

        let content = StackConfig::sample(&self.namespace, &self.name);
        // A sample that does not plan is a bug, not a user error
        if let Err(e) = StackConfig::from_yaml_str(&content) {
            return ctx.fail(&e);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;

        if ctx.output.is_json() {
            ctx.output
                .json(&serde_json::json!({ "created": self.path.display().to_string() }))?;
        } else {
            ctx.output
                .line(&format!("Wrote sample stack to {}", self.path.display()));
            ctx.output.hint(&format!(
                "run 'eksform plan -s {}' to see what it would create",
                self.path.display()
            ));
        }
        Ok(0)
    }
}
