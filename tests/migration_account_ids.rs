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

fn set_account_id(conn: &Connection, plugin: &str, value: &str) {
    conn.execute(
        "INSERT INTO plugin_config(plugin, name, value) VALUES(?, 'account_id', ?)
         ON CONFLICT(plugin, name) DO UPDATE SET value = excluded.value",
        [plugin, value],
    )
    .unwrap();
}

fn check(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) -> bool {
    let result = request_ok(stdin, reader, id, "migration.checkAccountIds", json!({}));
    result.get("matched").and_then(|v| v.as_bool()).unwrap()
}

#[test]
fn matching_account_ids_permit_migration() {
    let workspace = temp_dir("marksync-accounts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = open_workspace_db(&workspace);

    // Nothing configured: no match.
    assert!(!check(&mut stdin, &mut reader, "2"));

    set_account_id(&conn, "v1", "1234");
    set_account_id(&conn, "v2", "1234");
    assert!(check(&mut stdin, &mut reader, "3"));

    set_account_id(&conn, "v1", "5678");
    assert!(!check(&mut stdin, &mut reader, "4"));
}
