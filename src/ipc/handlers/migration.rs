use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::migrate::{self, GradebookMode, GradebookOutcome};
use serde_json::json;

fn param_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

/// Full interactive migration of one v1 assignment: hide the source,
/// reconcile the course link, copy the graph, catch up the gradebook and,
/// when the catch-up completed inline, finish the title bookkeeping.
fn handle_migration_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db,
        migration_session,
        ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(course_id) = param_i64(req, "courseId") else {
        return err(&req.id, "bad_params", "missing params.courseId", None);
    };
    let Some(assignment_id) = param_i64(req, "assignmentId") else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };

    let v1_course = match migrate::get_v1_course(conn, course_id) {
        Ok(Some(c)) => c,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("no v1 course link for course {}", course_id),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = migrate::hide_v1_assignment(conn, assignment_id) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let course_link = match migrate::migrate_course(conn, &v1_course, assignment_id) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    let v2_assignment_id =
        match migrate::migrate(conn, migration_session, course_id, assignment_id) {
            Ok(id) => id,
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        };

    let outcome = match migrate::migrate_gradebook(conn, v2_assignment_id, GradebookMode::Interactive)
    {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    if outcome == GradebookOutcome::Migrated {
        if let Err(e) = migrate::update_titles_post_migration(conn, assignment_id) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(
        &req.id,
        json!({
            "v2AssignmentId": v2_assignment_id,
            "courseType": course_link.course_type.tag(),
            "gradebook": outcome.tag(),
        }),
    )
}

fn handle_migration_hide(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_i64(req, "assignmentId") else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };

    match migrate::hide_v1_assignment(conn, assignment_id) {
        Ok(()) => ok(&req.id, json!({})),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_migration_update_titles(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_i64(req, "assignmentId") else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };

    match migrate::update_titles_post_migration(conn, assignment_id) {
        Ok(()) => ok(&req.id, json!({})),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_migration_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = param_i64(req, "courseId") else {
        return err(&req.id, "bad_params", "missing params.courseId", None);
    };
    let Some(assignment_id) = param_i64(req, "assignmentId") else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };

    let v1_course = match migrate::get_v1_course(conn, course_id) {
        Ok(Some(c)) => c,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("no v1 course link for course {}", course_id),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match migrate::migrate_course(conn, &v1_course, assignment_id) {
        Ok(link) => ok(
            &req.id,
            json!({
                "courseId": link.course_id,
                "ownerId": link.owner_id,
                "externalCourseId": link.external_course_id,
                "courseType": link.course_type.tag(),
            }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_migration_gradebook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_i64(req, "assignmentId") else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };
    let mode = match req.params.get("mode").and_then(|v| v.as_str()) {
        Some("cron") => GradebookMode::Batch,
        _ => GradebookMode::Interactive,
    };

    match migrate::migrate_gradebook(conn, assignment_id, mode) {
        Ok(outcome) => ok(&req.id, json!({ "status": outcome.tag() })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_migration_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(user_id) = param_i64(req, "userId") else {
        return err(&req.id, "bad_params", "missing params.userId", None);
    };

    match migrate::migrate_user(conn, user_id) {
        Ok(()) => ok(&req.id, json!({})),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_migration_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assignment_id) = param_i64(req, "assignmentId") else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };

    match state.migration_session.get(&assignment_id) {
        Some(v2_id) => ok(&req.id, json!({ "v2AssignmentId": v2_id })),
        None => err(
            &req.id,
            "not_found",
            format!("assignment {} not migrated in this session", assignment_id),
            None,
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "migration.assignment" => Some(handle_migration_assignment(state, req)),
        "migration.hide" => Some(handle_migration_hide(state, req)),
        "migration.updateTitles" => Some(handle_migration_update_titles(state, req)),
        "migration.course" => Some(handle_migration_course(state, req)),
        "migration.gradebook" => Some(handle_migration_gradebook(state, req)),
        "migration.user" => Some(handle_migration_user(state, req)),
        "migration.resolve" => Some(handle_migration_resolve(state, req)),
        _ => None,
    }
}
