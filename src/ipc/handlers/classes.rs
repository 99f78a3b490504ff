use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let capacity = match req.params.get("capacity").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing capacity", None),
    };
    if capacity <= 0 {
        return err(&req.id, "bad_params", "capacity must be positive", None);
    }

    let existing: Option<String> = match conn
        .query_row("SELECT id FROM classes WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return err(
            &req.id,
            "duplicate_name",
            format!("class '{}' already exists", name),
            Some(json!({ "classId": id })),
        );
    }

    let class_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, capacity, homeroom_teacher_id, version, updated_at)
         VALUES(?, ?, ?, NULL, 0, ?)",
        (&class_id, &name, capacity, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "capacity": capacity }),
    )
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries keep the counts join-free; the homeroom name is a
    // plain left join since there is at most one.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.capacity,
           c.homeroom_teacher_id,
           t.name AS homeroom_name,
           (SELECT COUNT(*) FROM class_subject_teachers cst WHERE cst.class_id = c.id) AS subject_teacher_count,
           (SELECT COUNT(*) FROM class_taught_subjects cts WHERE cts.class_id = c.id) AS taught_subject_count
         FROM classes c
         LEFT JOIN teachers t ON t.id = c.homeroom_teacher_id
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: i64 = row.get(2)?;
            let homeroom_teacher_id: Option<String> = row.get(3)?;
            let homeroom_name: Option<String> = row.get(4)?;
            let subject_teacher_count: i64 = row.get(5)?;
            let taught_subject_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "homeroomTeacherId": homeroom_teacher_id,
                "homeroomTeacherName": homeroom_name,
                "subjectTeacherCount": subject_teacher_count,
                "taughtSubjectCount": taught_subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        _ => None,
    }
}
