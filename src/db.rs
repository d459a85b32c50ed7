use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "maktab.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            guardian_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracking_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            from_chapter INTEGER NOT NULL,
            to_chapter INTEGER NOT NULL,
            from_verse INTEGER NOT NULL,
            to_verse INTEGER NOT NULL,
            total_verses INTEGER NOT NULL,
            recorded_on TEXT NOT NULL,
            note TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracking_student ON tracking_entries(student_id, recorded_on)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            default_amount TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    // Amounts are decimal text; never REAL.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices(
            id TEXT PRIMARY KEY,
            invoice_no INTEGER NOT NULL UNIQUE,
            bill_to TEXT NOT NULL,
            issued_on TEXT NOT NULL,
            status TEXT NOT NULL,
            discount_percentage TEXT NOT NULL,
            subtotal TEXT NOT NULL,
            discount_amount TEXT NOT NULL,
            total TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoice_line_items(
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL,
            student_id TEXT,
            subject_name TEXT NOT NULL,
            fee_breakdown_json TEXT NOT NULL,
            total_amount TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(invoice_id) REFERENCES invoices(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_line_items_invoice ON invoice_line_items(invoice_id, sort_order)",
        [],
    )?;

    // Workspaces created before notes existed on tracking entries.
    ensure_tracking_note(&conn)?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

fn ensure_tracking_note(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "tracking_entries", "note")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE tracking_entries ADD COLUMN note TEXT", [])?;
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
