//! CLI command implementations.

pub mod form;
pub mod init;
pub mod lease;
pub mod published;

use clap::{Args, Subcommand};

/// Exit code for a write rejected by a version conflict.
pub const EXIT_CONFLICT: i32 = 2;

/// Arguments for the init command.
#[derive(Args)]
pub struct InitArgs {
    /// Also write the effective configuration to this path.
    #[arg(long)]
    pub write_config: Option<String>,

    /// Overwrite an existing config file.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the published command.
#[derive(Args)]
pub struct PublishedArgs {
    #[command(subcommand)]
    pub command: PublishedCommand,
}

#[derive(Subcommand)]
pub enum PublishedCommand {
    /// Print a published row.
    Show {
        /// Key code of the content.
        key_code: String,

        /// Schema version (default: newest).
        #[arg(short, long)]
        schema: Option<u32>,

        /// List every schema version instead of one row.
        #[arg(long, conflicts_with = "schema")]
        all: bool,
    },
}

/// Form identity flags shared by the form subcommands.
#[derive(Args, Clone)]
pub struct IdentityArgs {
    /// Access id of the session.
    #[arg(long = "access")]
    pub access_id: String,

    /// Team number.
    #[arg(long = "team")]
    pub team_no: u32,

    /// Scenario outline id.
    #[arg(long = "outline")]
    pub outline_id: u64,

    /// Exercise number.
    #[arg(long = "exercise")]
    pub exercise_no: u32,

    /// Form key.
    #[arg(long = "key")]
    pub form_key: String,

    /// Operate on the attachment metadata instead of the form body.
    #[arg(long)]
    pub attachment: bool,
}

/// Arguments for the form command.
#[derive(Args)]
pub struct FormArgs {
    #[command(subcommand)]
    pub command: FormCommand,
}

#[derive(Subcommand)]
pub enum FormCommand {
    /// Read the current document.
    Get {
        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Write a document if its version still matches.
    Put {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Version the write was based on (0 creates).
        #[arg(short, long)]
        expected: i64,

        /// New body as JSON. For attachments, `null` clears it.
        #[arg(short, long)]
        data: String,
    },
}

/// Arguments for the lease command.
#[derive(Args)]
pub struct LeaseArgs {
    #[command(subcommand)]
    pub command: LeaseCommand,
}

#[derive(Subcommand)]
pub enum LeaseCommand {
    /// Show who holds a lease and when it expires.
    Show {
        /// Lock name, e.g. `lock:published:<key_code>:v<n>`.
        name: String,
    },

    /// Delete a lease regardless of owner.
    Break {
        /// Lock name.
        name: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}
