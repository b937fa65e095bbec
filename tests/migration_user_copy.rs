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
fn user_copies_once_into_the_v2_table() {
    let workspace = temp_dir("marksync-user");
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
        "INSERT INTO v1_users(user_id, external_user_id, external_role) VALUES(7, 1001, 1)",
        [],
    )
    .unwrap();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "migration.user",
        json!({ "userId": 7 }),
    );

    let (count, external_user_id): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), MAX(external_user_id) FROM v2_users WHERE user_id = 7",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(external_user_id, 1001);

    // Re-running the copy leaves a single row.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "migration.user",
        json!({ "userId": 7 }),
    );
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM v2_users WHERE user_id = 7", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn unknown_user_is_an_error() {
    let workspace = temp_dir("marksync-user-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let raw = request(
        &mut stdin,
        &mut reader,
        "2",
        "migration.user",
        json!({ "userId": 99 }),
    );
    assert_eq!(raw.get("ok").and_then(|v| v.as_bool()), Some(false));
}
