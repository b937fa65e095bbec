use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

/// Nullable per-assignment configuration columns shared by the v1 and v2
/// assignment tables. Normalization guarantees none of these stays NULL.
pub const ASSIGNMENT_CONFIG_FIELDS: &[&str] = &[
    "grade",
    "allowlate",
    "reportgenspeed",
    "submitpapersto",
    "spapercheck",
    "internetcheck",
    "journalcheck",
    "introformat",
    "studentreports",
    "dateformat",
    "usegrademark",
    "gradedisplay",
    "autoupdates",
    "commentedittime",
    "commentmaxsize",
    "autosubmission",
    "shownonsubmission",
    "excludebiblio",
    "excludequoted",
    "excludevalue",
    "erater",
    "erater_handbook",
    "erater_spelling",
    "erater_grammar",
    "erater_usage",
    "erater_mechanics",
    "erater_style",
    "transmatch",
    "excludetype",
    "perpage",
];

fn config_columns_sql() -> String {
    ASSIGNMENT_CONFIG_FIELDS
        .iter()
        .map(|f| format!("{} INTEGER", f))
        .collect::<Vec<_>>()
        .join(",\n            ")
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("marksync.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    let config_cols = config_columns_sql();

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS v1_assignments(
            id INTEGER PRIMARY KEY,
            course INTEGER NOT NULL,
            name TEXT NOT NULL,
            {},
            migrated INTEGER NOT NULL DEFAULT 0,
            legacy INTEGER NOT NULL DEFAULT 0
        )",
            config_cols
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_v1_assignments_course ON v1_assignments(course)",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS v2_assignments(
            id INTEGER PRIMARY KEY,
            course INTEGER NOT NULL,
            name TEXT NOT NULL,
            {}
        )",
            config_cols
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_v2_assignments_course ON v2_assignments(course)",
        [],
    )?;

    for table in ["v1_parts", "v2_parts"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                id INTEGER PRIMARY KEY,
                assignment_id INTEGER NOT NULL,
                part_name TEXT NOT NULL,
                ext_assignment_id INTEGER NOT NULL DEFAULT 0,
                dtstart INTEGER NOT NULL DEFAULT 0,
                dtdue INTEGER NOT NULL DEFAULT 0,
                dtpost INTEGER NOT NULL DEFAULT 0,
                max_marks INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0
            )",
                table
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_assignment ON {}(assignment_id)",
                table, table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS v1_submissions(
            id INTEGER PRIMARY KEY,
            assignment_id INTEGER NOT NULL,
            part_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_v1_submissions_assignment ON v1_submissions(assignment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS v2_submissions(
            id INTEGER PRIMARY KEY,
            assignment_id INTEGER NOT NULL,
            part_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            migrate_gradebook INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_v2_submissions_assignment ON v2_submissions(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_v2_submissions_gradebook
         ON v2_submissions(assignment_id, migrate_gradebook)",
        [],
    )?;

    for table in ["v1_courses", "v2_courses"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                id INTEGER PRIMARY KEY,
                course_id INTEGER NOT NULL,
                owner_id INTEGER NOT NULL DEFAULT 0,
                course_title TEXT NOT NULL,
                external_course_id INTEGER NOT NULL,
                course_type TEXT NOT NULL DEFAULT 'TT'
            )",
                table
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_external ON {}(external_course_id, course_type)",
                table, table
            ),
            [],
        )?;
    }

    for table in ["v1_users", "v2_users"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                external_user_id INTEGER NOT NULL DEFAULT 0,
                external_role INTEGER NOT NULL DEFAULT 0
            )",
                table
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_user ON {}(user_id)",
                table, table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_modules(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            module_name TEXT NOT NULL,
            instance_id INTEGER NOT NULL,
            section INTEGER NOT NULL DEFAULT 0,
            visible INTEGER NOT NULL DEFAULT 1,
            visible_old INTEGER NOT NULL DEFAULT 1,
            added INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_modules_instance
         ON course_modules(module_name, instance_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plugin_config(
            plugin TEXT NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY(plugin, name)
        )",
        [],
    )?;

    // Workspaces created before conflict tracking lack the legacy marker.
    ensure_v1_legacy_column(&conn)?;
    ensure_v2_migrate_gradebook(&conn)?;

    Ok(conn)
}

fn ensure_v1_legacy_column(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "v1_assignments", "legacy")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE v1_assignments ADD COLUMN legacy INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_v2_migrate_gradebook(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "v2_submissions", "migrate_gradebook")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE v2_submissions ADD COLUMN migrate_gradebook INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

pub fn config_get(conn: &Connection, plugin: &str, name: &str) -> anyhow::Result<Option<String>> {
    let v = conn
        .query_row(
            "SELECT value FROM plugin_config WHERE plugin = ? AND name = ?",
            [plugin, name],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(v)
}

pub fn config_set(conn: &Connection, plugin: &str, name: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO plugin_config(plugin, name, value)
         VALUES(?, ?, ?)
         ON CONFLICT(plugin, name) DO UPDATE SET
           value = excluded.value",
        [plugin, name, value],
    )?;
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
