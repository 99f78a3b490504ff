use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Full read projection of one Class aggregate with names resolved, shared by
/// `classes.get` and the success payload of every assignment operation.
pub(crate) fn class_projection(
    conn: &Connection,
    class_id: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let head = conn
        .query_row(
            "SELECT c.id, c.name, c.capacity, c.version, c.homeroom_teacher_id, t.name
             FROM classes c
             LEFT JOIN teachers t ON t.id = c.homeroom_teacher_id
             WHERE c.id = ?",
            [class_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((id, name, capacity, version, homeroom_id, homeroom_name)) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.default_subject_id, s.name
         FROM class_subject_teachers cst
         JOIN teachers t ON t.id = cst.teacher_id
         LEFT JOIN subjects s ON s.id = t.default_subject_id
         WHERE cst.class_id = ?
         ORDER BY t.name",
    )?;
    let subject_teachers = stmt
        .query_map([&id], |r| {
            let tid: String = r.get(0)?;
            let tname: String = r.get(1)?;
            let sid: Option<String> = r.get(2)?;
            let sname: Option<String> = r.get(3)?;
            Ok(json!({
                "teacherId": tid,
                "teacherName": tname,
                "subjectId": sid,
                "subjectName": sname
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.name
         FROM class_taught_subjects cts
         JOIN subjects s ON s.id = cts.subject_id
         WHERE cts.class_id = ?
         ORDER BY s.name",
    )?;
    let taught_subjects = stmt
        .query_map([&id], |r| {
            let sid: String = r.get(0)?;
            let sname: String = r.get(1)?;
            Ok(json!({ "subjectId": sid, "subjectName": sname }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let subject_teacher_ids: Vec<serde_json::Value> = subject_teachers
        .iter()
        .filter_map(|t| t.get("teacherId").cloned())
        .collect();
    let taught_subject_ids: Vec<serde_json::Value> = taught_subjects
        .iter()
        .filter_map(|s| s.get("subjectId").cloned())
        .collect();

    Ok(Some(json!({
        "id": id,
        "name": name,
        "capacity": capacity,
        "version": version,
        "homeroomTeacherId": homeroom_id,
        "homeroomTeacherName": homeroom_name,
        "subjectTeacherIds": subject_teacher_ids,
        "subjectTeachers": subject_teachers,
        "taughtSubjectIds": taught_subject_ids,
        "taughtSubjects": taught_subjects
    })))
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    match class_projection(conn, &class_id) {
        Ok(Some(projection)) => ok(&req.id, projection),
        Ok(None) => err(&req.id, "not_found", "class not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let homeroom = {
        let mut stmt = match conn.prepare(
            "SELECT id, name FROM classes WHERE homeroom_teacher_id = ? ORDER BY name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&teacher_id], |r| {
                let cid: String = r.get(0)?;
                let cname: String = r.get(1)?;
                Ok(json!({ "classId": cid, "className": cname }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let subject = {
        let mut stmt = match conn.prepare(
            "SELECT c.id, c.name
             FROM class_subject_teachers cst
             JOIN classes c ON c.id = cst.class_id
             WHERE cst.teacher_id = ?
             ORDER BY c.name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&teacher_id], |r| {
                let cid: String = r.get(0)?;
                let cname: String = r.get(1)?;
                Ok(json!({ "classId": cid, "className": cname }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "homeroomClasses": homeroom,
            "subjectClasses": subject
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.get" => Some(handle_classes_get(state, req)),
        "teachers.classes" => Some(handle_teachers_classes(state, req)),
        _ => None,
    }
}
