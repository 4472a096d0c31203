//! Inspect published content rows.

use anyhow::{bail, Result};
use coherence_sdk::coherence_cache::PublishedRow;

use super::{PublishedArgs, PublishedCommand};
use crate::context::Context;
use crate::output::format_bytes;

/// Run the published command.
pub async fn run(args: PublishedArgs, ctx: &Context) -> Result<i32> {
    match args.command {
        PublishedCommand::Show {
            key_code,
            schema,
            all,
        } => show(&key_code, schema, all, ctx),
    }
}

fn show(key_code: &str, schema: Option<u32>, all: bool, ctx: &Context) -> Result<i32> {
    let runtime = ctx.runtime()?;
    let store = runtime.cache().store();

    if all {
        let rows = store.versions(key_code)?;
        if rows.is_empty() {
            bail!("No published content for '{}'", key_code);
        }
        if ctx.output.is_json() {
            ctx.output.json(&rows);
        } else {
            ctx.output.header(&format!("Published versions of {}", key_code));
            for row in &rows {
                ctx.output.list_item(&format!(
                    "v{}  {}  by {}  ({})",
                    row.schema_version,
                    row.built_at,
                    row.built_by,
                    format_bytes(row.json_payload.len() as u64)
                ));
            }
        }
        return Ok(0);
    }

    let row = match schema {
        Some(version) => store.get(key_code, version)?,
        None => store.latest(key_code)?,
    };
    let Some(row) = row else {
        match schema {
            Some(version) => bail!("No published content for '{}' at v{}", key_code, version),
            None => bail!("No published content for '{}'", key_code),
        }
    };

    print_row(&row, ctx);
    Ok(0)
}

fn print_row(row: &PublishedRow, ctx: &Context) {
    if ctx.output.is_json() {
        ctx.output.json(row);
        return;
    }

    ctx.output.header(&row.row_key());
    ctx.output.kv("Schema", &row.schema_version.to_string());
    ctx.output.kv("Built at", &row.built_at);
    ctx.output.kv("Built by", &row.built_by);
    ctx.output
        .kv("Size", &format_bytes(row.json_payload.len() as u64));

    match serde_json::from_str::<serde_json::Value>(&row.json_payload) {
        Ok(value) => {
            ctx.output.kv("Payload", "");
            ctx.output.document(&value);
        }
        Err(e) => ctx
            .output
            .warn(&format!("Stored payload is not valid JSON: {}", e)),
    }
}
