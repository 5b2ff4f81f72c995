//! Database schema definitions

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let current_version = get_schema_version(conn)?;
    if current_version == 0 {
        info!("Creating database schema v{}", SCHEMA_VERSION);
        conn.execute_batch(TABLES)?;
        conn.execute_batch(INDEXES)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        debug!("Database schema is up to date (v{})", current_version);
    }
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// JSON documents (`data`, `metadata`, `content`, `responses`, `parts`) are
/// stored as TEXT and normalised by the content model on read.
const TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    is_admin INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exercises (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    week_number INTEGER,
    buddhism_concept TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exercise_steps (
    id TEXT PRIMARY KEY,
    exercise_id TEXT NOT NULL REFERENCES exercises(id) ON DELETE CASCADE,
    step_order INTEGER NOT NULL,
    title TEXT,
    content TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS completions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    exercise_id TEXT NOT NULL REFERENCES exercises(id) ON DELETE CASCADE,
    completion_message TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, exercise_id)
);

CREATE TABLE IF NOT EXISTS completion_steps (
    id TEXT PRIMARY KEY,
    completion_id TEXT NOT NULL REFERENCES completions(id) ON DELETE CASCADE,
    exercise_step_id TEXT NOT NULL REFERENCES exercise_steps(id) ON DELETE CASCADE,
    completed INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    responses TEXT,
    UNIQUE(completion_id, exercise_step_id)
);

CREATE TABLE IF NOT EXISTS conversation_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    completion_step_id TEXT NOT NULL REFERENCES completion_steps(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    parts TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS system_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_exercise_steps_exercise ON exercise_steps(exercise_id, step_order);
CREATE INDEX IF NOT EXISTS idx_completions_user ON completions(user_id);
CREATE INDEX IF NOT EXISTS idx_completion_steps_completion ON completion_steps(completion_id);
CREATE INDEX IF NOT EXISTS idx_messages_step ON conversation_messages(completion_step_id, created_at, seq);
"#;
