//! Create the coherence tables.

use std::path::Path;

use anyhow::{bail, Context as _, Result};

use super::InitArgs;
use crate::context::Context;

/// Run the init command.
pub async fn run(args: InitArgs, ctx: &Context) -> Result<i32> {
    ctx.output
        .header(&format!("Initializing {}", ctx.config.database.path));

    // Opening the runtime applies the migrations.
    let runtime = ctx.runtime()?;
    ctx.output.debug("Migrations applied");

    if let Some(path) = &args.write_config {
        write_config(Path::new(path), args.force, ctx)?;
    }

    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "database": runtime.config().database.path,
            "config": args.write_config,
        }));
    } else {
        ctx.output.success("Tables ready");
        ctx.output.kv("Database", &runtime.config().database.path);
        if let Some(path) = &ctx.config_path {
            ctx.output.kv("Config", &path.display().to_string());
        }
    }

    Ok(0)
}

fn write_config(path: &Path, force: bool, ctx: &Context) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config file '{}' already exists (use --force to overwrite)",
            path.display()
        );
    }

    let content = ctx.config.to_toml_string()?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    ctx.output
        .success(&format!("Wrote config to {}", path.display()));
    Ok(())
}
