//! Read and write form documents from the command line.

use anyhow::{Context as _, Result};
use coherence_sdk::coherence_forms::{
    AttachmentMeta, ConflictReport, FormData, FormDocument, FormIdentity, OccStore,
    WriteOutcome,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{FormArgs, FormCommand, IdentityArgs, EXIT_CONFLICT};
use crate::context::Context;

/// Run the form command.
pub async fn run(args: FormArgs, ctx: &Context) -> Result<i32> {
    let runtime = ctx.runtime()?;

    match args.command {
        FormCommand::Get { identity } => {
            let id = identity.to_identity()?;
            if identity.attachment {
                get(runtime.attachments(), &id, ctx)
            } else {
                get(runtime.forms(), &id, ctx)
            }
        }
        FormCommand::Put {
            identity,
            expected,
            data,
        } => {
            let id = identity.to_identity()?;
            if identity.attachment {
                let meta: Option<AttachmentMeta> = serde_json::from_str(&data)
                    .context("--data is not valid attachment metadata")?;
                put(runtime.attachments(), &id, expected, &meta, ctx)
            } else {
                let body: FormData =
                    serde_json::from_str(&data).context("--data must be a JSON object")?;
                put(runtime.forms(), &id, expected, &body, ctx)
            }
        }
    }
}

impl IdentityArgs {
    fn to_identity(&self) -> Result<FormIdentity> {
        Ok(FormIdentity::new(
            self.access_id.clone(),
            self.team_no,
            self.outline_id,
            self.exercise_no,
            self.form_key.clone(),
        )?)
    }
}

fn get<T>(store: &OccStore<T>, id: &FormIdentity, ctx: &Context) -> Result<i32>
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    let doc = store.read(id)?;
    print_document(id, &doc, ctx)?;
    Ok(0)
}

fn put<T>(
    store: &OccStore<T>,
    id: &FormIdentity,
    expected: i64,
    data: &T,
    ctx: &Context,
) -> Result<i32>
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    match store.write(id, expected, data)? {
        WriteOutcome::Committed(doc) => {
            ctx.output
                .success(&format!("Committed {} at v{}", id, doc.version));
            print_document(id, &doc, ctx)?;
            Ok(0)
        }
        WriteOutcome::Conflict(report) => {
            print_conflict(id, expected, &report, ctx)?;
            Ok(EXIT_CONFLICT)
        }
    }
}

fn print_document<T: Serialize>(
    id: &FormIdentity,
    doc: &FormDocument<T>,
    ctx: &Context,
) -> Result<()> {
    if ctx.output.is_json() {
        ctx.output.json(doc);
        return Ok(());
    }

    ctx.output.header(&id.to_string());
    ctx.output.kv("Version", &doc.version.to_string());
    ctx.output.kv(
        "Updated",
        doc.updated_at.as_deref().unwrap_or("never written"),
    );
    ctx.output.kv("Data", "");
    ctx.output.document(&serde_json::to_value(&doc.data)?);
    Ok(())
}

fn print_conflict<T: Serialize>(
    id: &FormIdentity,
    expected: i64,
    report: &ConflictReport<T>,
    ctx: &Context,
) -> Result<()> {
    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "error": "version_conflict",
            "expected_version": expected,
            "conflict": report,
        }));
        return Ok(());
    }

    ctx.output.warn(&format!(
        "Version conflict on {}: expected v{}, current v{}",
        id, expected, report.current_version
    ));
    ctx.output.kv("Current data", "");
    ctx.output.document(&serde_json::to_value(&report.current_data)?);
    ctx.output.info(&format!(
        "Re-apply your change and retry with --expected {}",
        report.current_version
    ));
    Ok(())
}
