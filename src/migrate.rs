use crate::db::{self, ASSIGNMENT_CONFIG_FIELDS};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

pub const MODULE_V1: &str = "v1assignment";
pub const MODULE_V2: &str = "v2assignment";

pub const IN_PROGRESS_MARKER: &str = " (Migration in progress...)";
pub const MIGRATED_MARKER: &str = " (Migrated)";

/// Pending gradebook rows at or below this count are synced inside the
/// interactive request; larger backlogs are deferred to the cron worker.
/// Overridable via plugin_config (v2, gradebook_sync_cap).
pub const DEFAULT_GRADEBOOK_CAP: i64 = 200;

/// Per-process map from v1 assignment id to its migrated v2 counterpart,
/// used to short-circuit navigation without re-querying.
pub type MigrationSession = HashMap<i64, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseType {
    /// A course created natively against the v2 integration.
    Native,
    /// A course carried over from the v1 plugin on the legacy track.
    Legacy,
}

impl CourseType {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Native => "TT",
            Self::Legacy => "V1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TT" => Some(Self::Native),
            "V1" => Some(Self::Legacy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Off,
    On,
    Auto,
}

impl MigrationStatus {
    /// Invalid input never errors; it collapses to Off before persisting.
    pub fn coerce(v: Option<i64>) -> Self {
        match v {
            Some(1) => Self::On,
            Some(2) => Self::Auto,
            _ => Self::Off,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Auto => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradebookMode {
    Interactive,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradebookOutcome {
    Migrated,
    Cron,
}

impl GradebookOutcome {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::Cron => "cron",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CourseLink {
    pub id: i64,
    pub course_id: i64,
    pub owner_id: i64,
    pub course_title: String,
    pub external_course_id: i64,
    pub course_type: CourseType,
}

pub fn default_for(field: &str) -> i64 {
    match field {
        "grade" => 100,
        "perpage" => 25,
        _ => 0,
    }
}

/// Replace NULLs in the enumerated configuration fields with their defaults.
/// Runs on the in-memory row before the v2 insert, never after.
pub fn normalize_config(values: &mut [Option<i64>]) {
    for (i, v) in values.iter_mut().enumerate() {
        if v.is_none() {
            *v = Some(default_for(ASSIGNMENT_CONFIG_FIELDS[i]));
        }
    }
}

fn course_link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CourseLink> {
    let tag: String = row.get(5)?;
    Ok(CourseLink {
        id: row.get(0)?,
        course_id: row.get(1)?,
        owner_id: row.get(2)?,
        course_title: row.get(3)?,
        external_course_id: row.get(4)?,
        // Unknown tags in the store are a data error; treat as legacy track.
        course_type: CourseType::parse(&tag).unwrap_or(CourseType::Legacy),
    })
}

pub fn get_v1_course(conn: &Connection, course_id: i64) -> anyhow::Result<Option<CourseLink>> {
    let link = conn
        .query_row(
            "SELECT id, course_id, owner_id, course_title, external_course_id, course_type
             FROM v1_courses WHERE course_id = ?",
            [course_id],
            |r| course_link_from_row(r),
        )
        .optional()?;
    Ok(link)
}

fn get_v2_course_by_external(
    conn: &Connection,
    external_course_id: i64,
    course_type: CourseType,
) -> anyhow::Result<Option<CourseLink>> {
    let link = conn
        .query_row(
            "SELECT id, course_id, owner_id, course_title, external_course_id, course_type
             FROM v2_courses WHERE external_course_id = ? AND course_type = ?",
            rusqlite::params![external_course_id, course_type.tag()],
            |r| course_link_from_row(r),
        )
        .optional()?;
    Ok(link)
}

/// Course reconciliation: return the v2 course link representing the same
/// external course, creating one if absent. Idempotent per
/// (external id, type) pair. When the local course is already claimed by a
/// native v2 link, the new link goes on the legacy track and the v1
/// assignment is marked as a legacy conflict.
pub fn migrate_course(
    conn: &Connection,
    v1_course: &CourseLink,
    v1_assignment_id: i64,
) -> anyhow::Result<CourseLink> {
    if let Some(existing) =
        get_v2_course_by_external(conn, v1_course.external_course_id, CourseType::Native)?
    {
        return Ok(existing);
    }
    if let Some(existing) =
        get_v2_course_by_external(conn, v1_course.external_course_id, CourseType::Legacy)?
    {
        return Ok(existing);
    }

    let native_claims: i64 = conn.query_row(
        "SELECT COUNT(*) FROM v2_courses WHERE course_id = ? AND course_type = ?",
        rusqlite::params![v1_course.course_id, CourseType::Native.tag()],
        |r| r.get(0),
    )?;

    let course_type = if native_claims > 0 {
        conn.execute(
            "UPDATE v1_assignments SET legacy = 1 WHERE id = ?",
            [v1_assignment_id],
        )?;
        CourseType::Legacy
    } else {
        CourseType::Native
    };

    conn.execute(
        "INSERT INTO v2_courses(course_id, owner_id, course_title, external_course_id, course_type)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            v1_course.course_id,
            v1_course.owner_id,
            v1_course.course_title,
            v1_course.external_course_id,
            course_type.tag()
        ],
    )?;
    let id = conn.last_insert_rowid();

    Ok(CourseLink {
        id,
        course_id: v1_course.course_id,
        owner_id: v1_course.owner_id,
        course_title: v1_course.course_title.clone(),
        external_course_id: v1_course.external_course_id,
        course_type,
    })
}

/// Copy a v1 user row into the v2 user table. A user already present in v2
/// is left untouched.
pub fn migrate_user(conn: &Connection, user_id: i64) -> anyhow::Result<()> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM v2_users WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Ok(());
    }

    let v1: Option<(i64, i64)> = conn
        .query_row(
            "SELECT external_user_id, external_role FROM v1_users WHERE user_id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((external_user_id, external_role)) = v1 else {
        anyhow::bail!("no v1 user record for user {}", user_id);
    };

    conn.execute(
        "INSERT INTO v2_users(user_id, external_user_id, external_role) VALUES(?, ?, ?)",
        rusqlite::params![user_id, external_user_id, external_role],
    )?;
    Ok(())
}

/// Unmigrated -> Migrating: rename with the in-progress marker and hide the
/// course module. visible_old is forced down as well so a later "restore
/// visibility" pass cannot un-hide the record.
pub fn hide_v1_assignment(conn: &Connection, v1_assignment_id: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE v1_assignments SET name = name || ? WHERE id = ?",
        rusqlite::params![IN_PROGRESS_MARKER, v1_assignment_id],
    )?;
    conn.execute(
        "UPDATE course_modules SET visible = 0, visible_old = 0
         WHERE module_name = ? AND instance_id = ?",
        rusqlite::params![MODULE_V1, v1_assignment_id],
    )?;
    Ok(())
}

/// Migrating -> Migrated: swap the in-progress marker for the completed one
/// and flag the v1 row as migrated.
pub fn update_titles_post_migration(conn: &Connection, v1_assignment_id: i64) -> anyhow::Result<()> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM v1_assignments WHERE id = ?",
            [v1_assignment_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(name) = name else {
        anyhow::bail!("no v1 assignment with id {}", v1_assignment_id);
    };

    let renamed = name.replace(IN_PROGRESS_MARKER, MIGRATED_MARKER);
    conn.execute(
        "UPDATE v1_assignments SET name = ?, migrated = 1 WHERE id = ?",
        rusqlite::params![renamed, v1_assignment_id],
    )?;
    Ok(())
}

/// Give the migrated module a course section so it shows up in the course
/// layout.
pub fn setup_v2_module(conn: &Connection, course_id: i64, v2_assignment_id: i64) -> anyhow::Result<()> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM course_modules WHERE module_name = ? AND instance_id = ?",
        rusqlite::params![MODULE_V2, v2_assignment_id],
        |r| r.get(0),
    )?;
    if existing > 0 {
        conn.execute(
            "UPDATE course_modules SET section = 1
             WHERE module_name = ? AND instance_id = ? AND section = 0",
            rusqlite::params![MODULE_V2, v2_assignment_id],
        )?;
        return Ok(());
    }

    let added = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO course_modules(course_id, module_name, instance_id, section, visible, visible_old, added)
         VALUES(?, ?, ?, 1, 1, 1, ?)",
        rusqlite::params![course_id, MODULE_V2, v2_assignment_id, added],
    )?;
    Ok(())
}

/// Copy one v1 assignment graph (assignment, parts, submissions) into the
/// v2 tables. Configuration fields are normalized before the insert and the
/// in-progress rename marker never reaches the v2 name. Copied submissions
/// are flagged for gradebook catch-up. Returns the new v2 assignment id and
/// records it in the session map.
pub fn migrate(
    conn: &Connection,
    session: &mut MigrationSession,
    course_id: i64,
    v1_assignment_id: i64,
) -> anyhow::Result<i64> {
    let cols = ASSIGNMENT_CONFIG_FIELDS.join(", ");

    let sql = format!(
        "SELECT name, {} FROM v1_assignments WHERE id = ?",
        cols
    );
    let row: Option<(String, Vec<Option<i64>>)> = conn
        .query_row(&sql, [v1_assignment_id], |r| {
            let name: String = r.get(0)?;
            let mut config = Vec::with_capacity(ASSIGNMENT_CONFIG_FIELDS.len());
            for i in 0..ASSIGNMENT_CONFIG_FIELDS.len() {
                config.push(r.get::<_, Option<i64>>(i + 1)?);
            }
            Ok((name, config))
        })
        .optional()?;
    let Some((name, mut config)) = row else {
        anyhow::bail!("no v1 assignment with id {}", v1_assignment_id);
    };

    normalize_config(&mut config);
    let clean_name = name.replace(IN_PROGRESS_MARKER, "");

    let tx = conn.unchecked_transaction()?;

    let placeholders = vec!["?"; 2 + ASSIGNMENT_CONFIG_FIELDS.len()].join(", ");
    let insert_sql = format!(
        "INSERT INTO v2_assignments(course, name, {}) VALUES({})",
        cols, placeholders
    );
    let mut values: Vec<Value> = Vec::with_capacity(2 + config.len());
    values.push(Value::from(course_id));
    values.push(Value::from(clean_name));
    for v in &config {
        values.push(match v {
            Some(n) => Value::from(*n),
            None => Value::Null,
        });
    }
    tx.execute(&insert_sql, params_from_iter(values))?;
    let v2_assignment_id = tx.last_insert_rowid();

    let mut part_stmt = tx.prepare(
        "SELECT id, part_name, ext_assignment_id, dtstart, dtdue, dtpost, max_marks, deleted
         FROM v1_parts WHERE assignment_id = ?",
    )?;
    let parts = part_stmt
        .query_map([v1_assignment_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, i64>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut sub_stmt = tx.prepare(
        "SELECT user_id, title FROM v1_submissions WHERE assignment_id = ? AND part_id = ?",
    )?;

    for (v1_part_id, part_name, ext_id, dtstart, dtdue, dtpost, max_marks, deleted) in &parts {
        tx.execute(
            "INSERT INTO v2_parts(assignment_id, part_name, ext_assignment_id, dtstart, dtdue, dtpost, max_marks, deleted)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                v2_assignment_id,
                part_name,
                ext_id,
                dtstart,
                dtdue,
                dtpost,
                max_marks,
                deleted
            ],
        )?;
        let v2_part_id = tx.last_insert_rowid();

        let submissions = sub_stmt
            .query_map(rusqlite::params![v1_assignment_id, v1_part_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (user_id, title) in submissions {
            tx.execute(
                "INSERT INTO v2_submissions(assignment_id, part_id, user_id, title, migrate_gradebook)
                 VALUES(?, ?, ?, ?, 1)",
                rusqlite::params![v2_assignment_id, v2_part_id, user_id, title],
            )?;
        }
    }
    drop(sub_stmt);
    drop(part_stmt);

    tx.commit()?;

    setup_v2_module(conn, course_id, v2_assignment_id)?;

    session.insert(v1_assignment_id, v2_assignment_id);
    Ok(v2_assignment_id)
}

pub fn gradebook_cap(conn: &Connection) -> i64 {
    db::config_get(conn, "v2", "gradebook_sync_cap")
        .ok()
        .flatten()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_GRADEBOOK_CAP)
}

/// Gradebook catch-up for a migrated assignment. Interactive calls give up
/// above the sync cap and hand the backlog to the cron worker, which
/// re-enters with Batch mode.
pub fn migrate_gradebook(
    conn: &Connection,
    v2_assignment_id: i64,
    mode: GradebookMode,
) -> anyhow::Result<GradebookOutcome> {
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM v2_submissions WHERE assignment_id = ? AND migrate_gradebook = 1",
        [v2_assignment_id],
        |r| r.get(0),
    )?;

    if mode == GradebookMode::Interactive && pending > gradebook_cap(conn) {
        return Ok(GradebookOutcome::Cron);
    }

    conn.execute(
        "UPDATE v2_submissions SET migrate_gradebook = 0
         WHERE assignment_id = ? AND migrate_gradebook = 1",
        [v2_assignment_id],
    )?;
    Ok(GradebookOutcome::Migrated)
}

/// Delete v1 assignments with their parts and submissions. One transaction
/// for the whole batch.
pub fn delete_assignments(conn: &Connection, ids: &[i64]) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0usize;
    for id in ids {
        tx.execute("DELETE FROM v1_submissions WHERE assignment_id = ?", [id])?;
        tx.execute("DELETE FROM v1_parts WHERE assignment_id = ?", [id])?;
        deleted += tx.execute("DELETE FROM v1_assignments WHERE id = ?", [id])?;
    }
    tx.commit()?;
    Ok(deleted)
}

pub fn toggle_migration_status(conn: &Connection, status: MigrationStatus) -> anyhow::Result<()> {
    db::config_set(conn, "v2", "migration_enabled", &status.as_i64().to_string())
}

/// Migration is only permitted when both plugin generations talk to the
/// same external account.
pub fn check_account_ids(conn: &Connection) -> anyhow::Result<bool> {
    let v1 = db::config_get(conn, "v1", "account_id")?;
    let v2 = db::config_get(conn, "v2", "account_id")?;
    Ok(match (v1, v2) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    })
}

#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub display_start: i64,
    pub display_length: i64,
    pub search: String,
}

#[derive(Debug, Clone)]
pub struct ListingRow {
    pub id: i64,
    pub name: String,
    pub migrated: bool,
}

#[derive(Debug, Clone)]
pub struct ListingPage {
    pub rows: Vec<ListingRow>,
    pub total_records: i64,
    pub total_display_records: i64,
}

/// Paginated v1 assignment listing ordered by name, with an optional
/// case-insensitive substring filter applied identically to the data query
/// and the filtered count.
pub fn list_assignments(conn: &Connection, q: &ListingQuery) -> anyhow::Result<ListingPage> {
    let total_records: i64 =
        conn.query_row("SELECT COUNT(*) FROM v1_assignments", [], |r| r.get(0))?;

    let search = q.search.trim();
    let (filter_sql, pattern) = if search.is_empty() {
        (String::new(), None)
    } else {
        (
            " WHERE LOWER(name) LIKE LOWER(?)".to_string(),
            Some(format!("%{}%", search)),
        )
    };

    let total_display_records: i64 = match &pattern {
        Some(p) => conn.query_row(
            &format!("SELECT COUNT(*) FROM v1_assignments{}", filter_sql),
            [p],
            |r| r.get(0),
        )?,
        None => total_records,
    };

    let data_sql = format!(
        "SELECT id, name, migrated FROM v1_assignments{} ORDER BY name ASC LIMIT ? OFFSET ?",
        filter_sql
    );
    let mut stmt = conn.prepare(&data_sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<ListingRow> {
        Ok(ListingRow {
            id: r.get(0)?,
            name: r.get(1)?,
            migrated: r.get::<_, i64>(2)? != 0,
        })
    };
    let rows = match &pattern {
        Some(p) => stmt
            .query_map(
                rusqlite::params![p, q.display_length, q.display_start],
                map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![q.display_length, q.display_start], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(ListingPage {
        rows,
        total_records,
        total_display_records,
    })
}
