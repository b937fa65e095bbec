use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.outPath", None);
    };

    match backup::export_workspace_bundle(workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "bundleId": summary.bundle_id,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:?}"), None),
    }
}

fn handle_backup_import(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = req
        .params
        .get("inPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.inPath", None);
    };
    let Some(workspace_path) = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing params.workspacePath", None);
    };

    match backup::import_workspace_bundle(&in_path, &workspace_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormatDetected": summary.bundle_format_detected,
                "checksumVerified": summary.checksum_verified,
                "workspacePath": workspace_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "backup_import_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
