use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::migrate::{self, ListingQuery};
use serde_json::json;

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let echo = req.params.get("echo").and_then(|v| v.as_i64()).unwrap_or(0);
    let display_start = req
        .params
        .get("displayStart")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);
    let display_length = req
        .params
        .get("displayLength")
        .and_then(|v| v.as_i64())
        .unwrap_or(10)
        .max(1);
    let search = req
        .params
        .get("search")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let query = ListingQuery {
        display_start,
        display_length,
        search,
    };
    let page = match migrate::list_assignments(conn, &query) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Vec<serde_json::Value> = page
        .rows
        .iter()
        .map(|r| json!({ "id": r.id, "name": r.name, "migrated": r.migrated }))
        .collect();

    ok(
        &req.id,
        json!({
            "rows": rows,
            "echo": echo,
            "totalRecords": page.total_records,
            "totalDisplayRecords": page.total_display_records,
        }),
    )
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let ids: Vec<i64> = match req.params.get("ids").and_then(|v| v.as_array()) {
        Some(arr) => arr.iter().filter_map(|v| v.as_i64()).collect(),
        None => return err(&req.id, "bad_params", "missing params.ids", None),
    };
    if ids.is_empty() {
        return err(&req.id, "bad_params", "params.ids is empty", None);
    }

    match migrate::delete_assignments(conn, &ids) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.delete" => Some(handle_assignments_delete(state, req)),
        _ => None,
    }
}
