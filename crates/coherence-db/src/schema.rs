//! Table definitions owned by the coherence layer.
//!
//! Content source tables belong to the modules and are never touched here.

/// Statements applied in order by [`crate::Db::migrate`]. Each one is
/// idempotent.
pub const MIGRATIONS: &[&str] = &[
    // One immutable row per (key_code, schema_version).
    "CREATE TABLE IF NOT EXISTS published_content (
        key_code       TEXT    NOT NULL,
        schema_version INTEGER NOT NULL,
        json_payload   TEXT    NOT NULL,
        built_at       TEXT    NOT NULL,
        built_by       TEXT    NOT NULL,
        PRIMARY KEY (key_code, schema_version)
    )",
    "CREATE TABLE IF NOT EXISTS publish_leases (
        name          TEXT    PRIMARY KEY,
        owner         TEXT    NOT NULL,
        expires_at_ms INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS form_documents (
        access_id   TEXT    NOT NULL,
        team_no     INTEGER NOT NULL,
        outline_id  INTEGER NOT NULL,
        exercise_no INTEGER NOT NULL,
        form_key    TEXT    NOT NULL,
        version     INTEGER NOT NULL,
        payload     TEXT    NOT NULL,
        updated_at  TEXT    NOT NULL,
        PRIMARY KEY (access_id, team_no, outline_id, exercise_no, form_key)
    )",
    "CREATE TABLE IF NOT EXISTS form_attachments (
        access_id   TEXT    NOT NULL,
        team_no     INTEGER NOT NULL,
        outline_id  INTEGER NOT NULL,
        exercise_no INTEGER NOT NULL,
        form_key    TEXT    NOT NULL,
        version     INTEGER NOT NULL,
        payload     TEXT    NOT NULL,
        updated_at  TEXT    NOT NULL,
        PRIMARY KEY (access_id, team_no, outline_id, exercise_no, form_key)
    )",
];
