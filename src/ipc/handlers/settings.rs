use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::migrate::{self, MigrationStatus};
use crate::render;
use serde_json::json;

fn handle_toggle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Out-of-range and non-numeric values collapse to Off rather than
    // erroring; the toggle always reports success.
    let status = MigrationStatus::coerce(req.params.get("value").and_then(|v| v.as_i64()));
    match migrate::toggle_migration_status(conn, status) {
        Ok(()) => ok(
            &req.id,
            json!({ "saved": true, "value": status.as_i64() }),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_check_account_ids(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match migrate::check_account_ids(conn) {
        Ok(matched) => ok(&req.id, json!({ "matched": matched })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match render::progress_bar(conn) {
        Ok(html) => ok(&req.id, json!({ "html": html })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_modal(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing params.courseId", None);
    };
    let Some(assignment_id) = req.params.get("assignmentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing params.assignmentId", None);
    };

    ok(
        &req.id,
        json!({ "html": render::migrate_modal(course_id, assignment_id) }),
    )
}

fn handle_settings_form(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let permitted = req
        .params
        .get("permitted")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    ok(&req.id, json!({ "html": render::settings_form(permitted) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "migration.toggleStatus" => Some(handle_toggle_status(state, req)),
        "migration.checkAccountIds" => Some(handle_check_account_ids(state, req)),
        "migration.progress" => Some(handle_progress(state, req)),
        "migration.modal" => Some(handle_modal(state, req)),
        "migration.settingsForm" => Some(handle_settings_form(state, req)),
        _ => None,
    }
}
