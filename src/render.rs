use rusqlite::Connection;

pub const ACCOUNT_MISMATCH_WARNING: &str =
    "The migration tool is unavailable because the v1 and v2 integration accounts do not match.";

/// Progress bar for the migration dashboard: share of v1 assignments
/// already flagged as migrated. An empty table renders as 0%.
pub fn progress_bar(conn: &Connection) -> anyhow::Result<String> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM v1_assignments", [], |r| r.get(0))?;
    let migrated: i64 = conn.query_row(
        "SELECT COUNT(*) FROM v1_assignments WHERE migrated = 1",
        [],
        |r| r.get(0),
    )?;
    let percent = if total == 0 {
        0
    } else {
        migrated * 100 / total
    };

    Ok(format!(
        concat!(
            "<div class=\"migration_progress\">",
            "<div class=\"migration_progress_bar\" style=\"width: {p}%\">",
            "<span class=\"migration_progress_label\">{p}% complete</span>",
            "</div></div>"
        ),
        p = percent
    ))
}

/// Launcher markup for the migrate confirmation modal. The course and
/// assignment ids ride along as data attributes for the frontend handler.
pub fn migrate_modal(course_id: i64, assignment_id: i64) -> String {
    format!(
        concat!(
            "<a href=\"#\" class=\"migrate_link\" ",
            "data-courseid=\"{}\" data-assignmentid=\"{}\">",
            "<span class=\"migrate_label\">Migrate</span></a>"
        ),
        course_id, assignment_id
    )
}

/// Migration tool status form. Callers without permission get the account
/// mismatch warning instead of the toggle controls.
pub fn settings_form(permitted: bool) -> String {
    if !permitted {
        return format!(
            "<div class=\"migration_settings\"><p class=\"migration_warning\">{}</p></div>",
            ACCOUNT_MISMATCH_WARNING
        );
    }

    concat!(
        "<div class=\"migration_settings\">",
        "<form method=\"post\" class=\"migration_status_form\">",
        "<select name=\"migration_enabled\">",
        "<option value=\"0\">Off</option>",
        "<option value=\"1\">On</option>",
        "<option value=\"2\">Auto</option>",
        "</select>",
        "<button type=\"submit\">Save</button>",
        "</form></div>"
    )
    .to_string()
}
