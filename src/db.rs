use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("roster.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            staff_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            default_subject_id TEXT,
            updated_at TEXT,
            FOREIGN KEY(default_subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_default_subject ON teachers(default_subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            capacity INTEGER NOT NULL CHECK(capacity > 0),
            homeroom_teacher_id TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(homeroom_teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_homeroom ON classes(homeroom_teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subject_teachers(
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            PRIMARY KEY(class_id, teacher_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_subject_teachers_teacher
         ON class_subject_teachers(teacher_id)",
        [],
    )?;

    // Materialized copy of the derived taught-subjects set. Rewritten from the
    // in-memory snapshot inside the same transaction as every relation change,
    // never edited on its own.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_taught_subjects(
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_taught_subjects_subject
         ON class_taught_subjects(subject_id)",
        [],
    )?;

    // Workspaces created before the optimistic-concurrency check lack the
    // version column. Add and zero-fill if needed.
    ensure_classes_version(&conn)?;
    ensure_teachers_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_classes_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classes ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_teachers_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "teachers", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE teachers ADD COLUMN updated_at TEXT", [])?;
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
