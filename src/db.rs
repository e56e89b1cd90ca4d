use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "feebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Singleton row; annual fee is always derived as fee_per_term * 3 and
    // never stored.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            streams TEXT NOT NULL,
            fee_per_term REAL NOT NULL,
            current_term INTEGER NOT NULL,
            current_year INTEGER NOT NULL,
            school_name TEXT NOT NULL DEFAULT '',
            school_motto TEXT NOT NULL DEFAULT '',
            updated_at TEXT
        )",
        [],
    )?;
    ensure_settings_school_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            form INTEGER NOT NULL,
            stream TEXT NOT NULL,
            photo TEXT,
            is_cleared INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_form_stream ON students(form, stream)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            total_paid REAL NOT NULL DEFAULT 0,
            balance REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_records_student ON fee_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            fee_record_id TEXT NOT NULL,
            amount REAL NOT NULL,
            term INTEGER NOT NULL,
            year INTEGER NOT NULL,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(fee_record_id) REFERENCES fee_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_fee_record ON payments(fee_record_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_settings_school_columns(conn: &Connection) -> anyhow::Result<()> {
    // Workspaces created before the letterhead fields shipped lack these.
    if !table_has_column(conn, "settings", "school_name")? {
        conn.execute(
            "ALTER TABLE settings ADD COLUMN school_name TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    if !table_has_column(conn, "settings", "school_motto")? {
        conn.execute(
            "ALTER TABLE settings ADD COLUMN school_motto TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
