//! Database migrations for Hearth

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < SCHEMA_VERSION {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One profile per (user, person name)
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            relationship TEXT NOT NULL DEFAULT 'other',
            age TEXT,
            gender TEXT,
            height TEXT,
            grade TEXT,
            school TEXT,
            work_info TEXT,
            medical_info TEXT,
            diagnoses TEXT NOT NULL DEFAULT '[]',
            challenges TEXT NOT NULL DEFAULT '[]',
            strengths TEXT NOT NULL DEFAULT '[]',
            therapies TEXT NOT NULL DEFAULT '[]',
            medications TEXT NOT NULL DEFAULT '[]',
            parent_goals TEXT NOT NULL DEFAULT '[]',
            parent_notes TEXT NOT NULL DEFAULT '[]',
            ai_observations TEXT NOT NULL DEFAULT '[]',
            symptoms TEXT NOT NULL DEFAULT '{}',
            symptom_hash TEXT NOT NULL DEFAULT '',
            diagnostics TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_profiles_user ON profiles(user_id);

        -- Append-only message log; seq breaks timestamp ties
        CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, created_at);

        CREATE TABLE IF NOT EXISTS summaries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            summary_type TEXT NOT NULL,
            range_start INTEGER NOT NULL,
            range_end INTEGER NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_summaries_user ON summaries(user_id, summary_type);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}
