use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "karikari.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            photo TEXT,
            credit_balance INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profile_history(
            profile_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY(profile_id, subject),
            FOREIGN KEY(profile_id) REFERENCES profiles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profile_mistakes(
            profile_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            question TEXT NOT NULL,
            subject TEXT NOT NULL,
            added_at TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            PRIMARY KEY(profile_id, position),
            UNIQUE(profile_id, question),
            FOREIGN KEY(profile_id) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profile_mistakes_profile ON profile_mistakes(profile_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profile_attendance(
            profile_id TEXT NOT NULL,
            day TEXT NOT NULL,
            attended INTEGER NOT NULL,
            PRIMARY KEY(profile_id, day),
            FOREIGN KEY(profile_id) REFERENCES profiles(id)
        )",
        [],
    )?;

    Ok(())
}
