use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn subject_exists(conn: &rusqlite::Connection, subject_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let staff_no = match req.params.get("staffNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing staffNo", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if staff_no.is_empty() || name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "staffNo and name must not be empty",
            None,
        );
    }
    let default_subject_id = req
        .params
        .get("defaultSubjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(sid) = &default_subject_id {
        match subject_exists(conn, sid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "subject not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM teachers WHERE staff_no = ?",
            [&staff_no],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return err(
            &req.id,
            "duplicate_staff_no",
            format!("staff number '{}' already in use", staff_no),
            Some(json!({ "teacherId": id })),
        );
    }

    let teacher_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, staff_no, name, default_subject_id, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (&teacher_id, &staff_no, &name, &default_subject_id, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "staffNo": staff_no,
            "name": name,
            "defaultSubjectId": default_subject_id
        }),
    )
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let teacher = match store::load_teacher(conn, &teacher_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    if let Some(n) = &name {
        if n.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
    }

    // defaultSubjectId is tri-state: absent = keep, null = clear, string = set.
    let subject_change = match req.params.get("defaultSubjectId") {
        None => None,
        Some(serde_json::Value::Null) => Some(None),
        Some(serde_json::Value::String(s)) => Some(Some(s.to_string())),
        Some(_) => return err(&req.id, "bad_params", "defaultSubjectId must be a string or null", None),
    };

    if let Some(change) = &subject_change {
        // Changing the subject of specialization under live assignments would
        // silently break subject exclusivity and the derived taught-subjects
        // set in every affected class. Force unassignment first.
        if *change != teacher.default_subject_id {
            let counts = match store::assignment_counts(conn, &teacher_id) {
                Ok(c) => c,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if !counts.deletable() {
                return err(
                    &req.id,
                    "has_assignments",
                    "clear this teacher's class assignments before changing their subject",
                    Some(json!({
                        "homeroomClassCount": counts.homeroom_classes,
                        "subjectClassCount": counts.subject_classes
                    })),
                );
            }
        }
        if let Some(sid) = change {
            match subject_exists(conn, sid) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "subject not found", None),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    }

    let new_name = name.unwrap_or(teacher.name);
    let new_subject = subject_change.unwrap_or(teacher.default_subject_id);
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE teachers SET name = ?, default_subject_id = ?, updated_at = ? WHERE id = ?",
        (&new_name, &new_subject, &now, &teacher_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "name": new_name,
            "defaultSubjectId": new_subject
        }),
    )
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.staff_no,
           t.name,
           t.default_subject_id,
           s.name AS subject_name,
           (SELECT COUNT(*) FROM classes c WHERE c.homeroom_teacher_id = t.id) AS homeroom_count,
           (SELECT COUNT(*) FROM class_subject_teachers cst WHERE cst.teacher_id = t.id) AS subject_count
         FROM teachers t
         LEFT JOIN subjects s ON s.id = t.default_subject_id
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let staff_no: String = row.get(1)?;
            let name: String = row.get(2)?;
            let default_subject_id: Option<String> = row.get(3)?;
            let subject_name: Option<String> = row.get(4)?;
            let homeroom_count: i64 = row.get(5)?;
            let subject_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "staffNo": staff_no,
                "name": name,
                "defaultSubjectId": default_subject_id,
                "defaultSubjectName": subject_name,
                "homeroomClassCount": homeroom_count,
                "subjectClassCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Referential-integrity guard at the application layer: deletion is only
/// safe once every assignment has been cleared through the engine, so the
/// orphan-cleanup cascade has already run for each affected class.
fn handle_teachers_guard_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    match store::load_teacher(conn, &teacher_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let counts = match store::assignment_counts(conn, &teacher_id) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !counts.deletable() {
        return err(
            &req.id,
            "deletion_blocked",
            "teacher still has class assignments; clear them first",
            Some(json!({
                "homeroomClassCount": counts.homeroom_classes,
                "subjectClassCount": counts.subject_classes
            })),
        );
    }

    ok(&req.id, json!({ "deletable": true }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    match store::load_teacher(conn, &teacher_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let counts = match store::assignment_counts(conn, &teacher_id) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !counts.deletable() {
        return err(
            &req.id,
            "deletion_blocked",
            "teacher still has class assignments; clear them first",
            Some(json!({
                "homeroomClassCount": counts.homeroom_classes,
                "subjectClassCount": counts.subject_classes
            })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.guardDelete" => Some(handle_teachers_guard_delete(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
