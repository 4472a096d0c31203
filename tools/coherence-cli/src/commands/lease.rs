//! Inspect and break build leases.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use dialoguer::Confirm;

use super::{LeaseArgs, LeaseCommand};
use crate::context::Context;
use crate::output::{format_millis, lease_badge};

/// Run the lease command.
pub async fn run(args: LeaseArgs, ctx: &Context) -> Result<i32> {
    match args.command {
        LeaseCommand::Show { name } => show(&name, ctx),
        LeaseCommand::Break { name, yes } => break_lease(&name, yes, ctx),
    }
}

fn show(name: &str, ctx: &Context) -> Result<i32> {
    let runtime = ctx.runtime()?;
    let Some(lease) = runtime.leases().lease(name)? else {
        if ctx.output.is_json() {
            ctx.output.json(&serde_json::Value::Null);
        } else {
            ctx.output.info(&format!("No lease held for {}", name));
        }
        return Ok(0);
    };

    let now_ms = Utc::now().timestamp_millis();
    let expired = lease.expires_at_ms <= now_ms;

    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "name": lease.name,
            "owner": lease.owner,
            "expires_at_ms": lease.expires_at_ms,
            "expired": expired,
        }));
        return Ok(0);
    }

    let expires_at = Utc
        .timestamp_millis_opt(lease.expires_at_ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| lease.expires_at_ms.to_string());

    ctx.output.header(&lease.name);
    ctx.output.kv("State", &lease_badge(expired));
    ctx.output.kv("Owner", &lease.owner);
    ctx.output.kv("Expires", &expires_at);
    if !expired {
        ctx.output
            .kv("Remaining", &format_millis(lease.expires_at_ms - now_ms));
    }
    Ok(0)
}

fn break_lease(name: &str, yes: bool, ctx: &Context) -> Result<i32> {
    let runtime = ctx.runtime()?;

    if let Some(lease) = runtime.leases().lease(name)? {
        ctx.output.kv("Owner", &lease.owner);
    }

    if !yes {
        if ctx.output.is_json() {
            bail!("Refusing to break a lease without --yes in JSON mode");
        }
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Break lease {}? A builder still running under it may publish concurrently",
                name
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            ctx.output.info("Cancelled");
            return Ok(0);
        }
    }

    let removed = runtime.leases().break_lease(name)?;
    if ctx.output.is_json() {
        ctx.output
            .json(&serde_json::json!({ "name": name, "removed": removed }));
    } else if removed {
        ctx.output.success(&format!("Broke lease {}", name));
    } else {
        ctx.output.info(&format!("No lease held for {}", name));
    }
    Ok(0)
}
