use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_marksyncd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksyncd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn open_workspace_db(workspace: &Path) -> Connection {
    Connection::open(workspace.join("marksync.sqlite3")).expect("open workspace db")
}

#[test]
fn bundle_export_import_restores_the_seeded_rows() {
    let workspace = temp_dir("marksync-backup-src");
    let restored = temp_dir("marksync-backup-dst");
    let bundle_path = temp_dir("marksync-backup-out").join("snapshot.zip");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = open_workspace_db(&workspace);
    conn.execute(
        "INSERT INTO v1_assignments(course, name) VALUES(1, 'Snapshot Me')",
        [],
    )
    .unwrap();
    drop(conn);

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some("marksync-workspace-v1")
    );
    let sha = export
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("dbSha256");
    assert_eq!(sha.len(), 64);
    assert!(export.get("bundleId").and_then(|v| v.as_str()).is_some());

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({
            "inPath": bundle_path.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    assert_eq!(
        import.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("marksync-workspace-v1")
    );
    assert_eq!(
        import.get("checksumVerified").and_then(|v| v.as_bool()),
        Some(true)
    );

    // The restored workspace serves the seeded data.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": restored.to_string_lossy() }),
    );
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.list",
        json!({ "echo": 1, "displayStart": 0, "displayLength": 10, "search": "" }),
    );
    assert_eq!(
        listing.get("totalRecords").and_then(|v| v.as_i64()),
        Some(1)
    );
    let rows = listing.get("rows").and_then(|v| v.as_array()).unwrap();
    assert_eq!(
        rows[0].get("name").and_then(|v| v.as_str()),
        Some("Snapshot Me")
    );
}

#[test]
fn bare_sqlite_files_import_without_checksum() {
    let workspace = temp_dir("marksync-backup-legacy-src");
    let restored = temp_dir("marksync-backup-legacy-dst");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.import",
        json!({
            "inPath": workspace.join("marksync.sqlite3").to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    assert_eq!(
        import.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("legacy-sqlite3")
    );
    assert_eq!(
        import.get("checksumVerified").and_then(|v| v.as_bool()),
        Some(false)
    );
}
