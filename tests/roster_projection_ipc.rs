use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
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
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn extract(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {}", key))
        .to_string()
}

#[test]
fn class_projection_tracks_operations_and_versions() {
    let workspace = temp_dir("rosterd-projection");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let math_id = extract(
        &request_ok(&mut stdin, &mut reader, "2", "subjects.create", json!({ "name": "Math" })),
        "subjectId",
    );
    let science_id = extract(
        &request_ok(&mut stdin, &mut reader, "3", "subjects.create", json!({ "name": "Science" })),
        "subjectId",
    );
    let alice_id = extract(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "teachers.create",
            json!({ "staffNo": "T-001", "name": "Alice", "defaultSubjectId": math_id }),
        ),
        "teacherId",
    );
    let dina_id = extract(
        &request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "teachers.create",
            json!({ "staffNo": "T-003", "name": "Dina", "defaultSubjectId": science_id }),
        ),
        "teacherId",
    );
    let class_id = extract(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "classes.create",
            json!({ "name": "7A", "capacity": 30 }),
        ),
        "classId",
    );

    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "classes.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(fresh.get("version").and_then(|v| v.as_i64()), Some(0));
    assert!(fresh.get("homeroomTeacherId").map(|v| v.is_null()).unwrap_or(false));

    // Each successful mutation bumps the version exactly once; the payload an
    // operation returns matches what classes.get reads back.
    let after_assign = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "class.assignHomeroom",
        json!({ "classId": class_id, "teacherId": alice_id }),
    );
    assert_eq!(after_assign.get("version").and_then(|v| v.as_i64()), Some(1));
    let after_add = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "class.addSubjectTeacher",
        json!({ "classId": class_id, "teacherId": dina_id }),
    );
    assert_eq!(after_add.get("version").and_then(|v| v.as_i64()), Some(2));

    let read_back = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "classes.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(after_add, read_back);
    assert_eq!(
        read_back.get("homeroomTeacherName").and_then(|v| v.as_str()),
        Some("Alice")
    );
    assert_eq!(
        read_back
            .get("taughtSubjectIds")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    // Dropdown projections with counts.
    let classes = request_ok(&mut stdin, &mut reader, "11", "classes.list", json!({}));
    let row = classes
        .get("classes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("one class row");
    assert_eq!(row.get("subjectTeacherCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(row.get("taughtSubjectCount").and_then(|v| v.as_i64()), Some(2));

    let teachers = request_ok(&mut stdin, &mut reader, "12", "teachers.list", json!({}));
    let alice_row = teachers
        .get("teachers")
        .and_then(|v| v.as_array())
        .and_then(|a| {
            a.iter()
                .find(|t| t.get("id").and_then(|v| v.as_str()) == Some(alice_id.as_str()))
        })
        .cloned()
        .expect("alice row");
    assert_eq!(
        alice_row.get("homeroomClassCount").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        alice_row.get("defaultSubjectName").and_then(|v| v.as_str()),
        Some("Math")
    );

    let subjects = request_ok(&mut stdin, &mut reader, "13", "subjects.list", json!({}));
    let math_row = subjects
        .get("subjects")
        .and_then(|v| v.as_array())
        .and_then(|a| {
            a.iter()
                .find(|s| s.get("name").and_then(|v| v.as_str()) == Some("Math"))
        })
        .cloned()
        .expect("math row");
    assert_eq!(math_row.get("classCount").and_then(|v| v.as_i64()), Some(1));

    // Per-teacher class lists, split by role.
    let dina_classes = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "teachers.classes",
        json!({ "teacherId": dina_id }),
    );
    assert_eq!(
        dina_classes
            .get("homeroomClasses")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    assert_eq!(
        dina_classes
            .get("subjectClasses")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("className"))
            .and_then(|v| v.as_str()),
        Some("7A")
    );
}

#[test]
fn roster_state_survives_a_sidecar_restart() {
    let workspace = temp_dir("rosterd-restart");

    let class_id;
    {
        let (_child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let math_id = extract(
            &request_ok(&mut stdin, &mut reader, "2", "subjects.create", json!({ "name": "Math" })),
            "subjectId",
        );
        let alice_id = extract(
            &request_ok(
                &mut stdin,
                &mut reader,
                "3",
                "teachers.create",
                json!({ "staffNo": "T-001", "name": "Alice", "defaultSubjectId": math_id }),
            ),
            "teacherId",
        );
        class_id = extract(
            &request_ok(
                &mut stdin,
                &mut reader,
                "4",
                "classes.create",
                json!({ "name": "7A", "capacity": 30 }),
            ),
            "classId",
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "class.assignHomeroom",
            json!({ "classId": class_id, "teacherId": alice_id }),
        );
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        reopened.get("homeroomTeacherName").and_then(|v| v.as_str()),
        Some("Alice")
    );
    assert_eq!(
        reopened
            .get("taughtSubjects")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|s| s.get("subjectName"))
            .and_then(|v| v.as_str()),
        Some("Math")
    );
}

#[test]
fn create_validations_and_uniqueness() {
    let workspace = temp_dir("rosterd-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(&mut stdin, &mut reader, "2", "subjects.create", json!({ "name": "Math" }));
    let error = request_err(&mut stdin, &mut reader, "3", "subjects.create", json!({ "name": "Math" }));
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("duplicate_name"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "staffNo": "T-001", "name": "Alice" }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({ "staffNo": "T-001", "name": "Someone Else" }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("duplicate_staff_no")
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({ "staffNo": "T-002", "name": "Bob", "defaultSubjectId": "no-such-subject" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "classes.create",
        json!({ "name": "7A", "capacity": 30 }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "classes.create",
        json!({ "name": "7A", "capacity": 25 }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("duplicate_name"));
    let error = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "classes.create",
        json!({ "name": "7B", "capacity": 0 }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}

#[test]
fn requests_before_workspace_selection_are_refused() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "class.assignHomeroom",
        json!({ "classId": "x", "teacherId": "y" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("no_workspace"));

    let value = request(
        &mut stdin,
        &mut reader,
        "2",
        "roster.unknown",
        json!({}),
    );
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );
}
