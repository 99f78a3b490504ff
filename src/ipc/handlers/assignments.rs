use crate::engine::{self, ClassSnapshot, Refusal};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::queries;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, PersistOutcome};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn param_str(req: &Request, key: &str) -> Option<String> {
    req.params.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn subject_name(conn: &Connection, subject_id: &str) -> Option<String> {
    conn.query_row(
        "SELECT name FROM subjects WHERE id = ?",
        [subject_id],
        |r| r.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

/// Map an engine refusal to its wire envelope. Refusal payloads carry enough
/// ids and names that the admin UI can render them without another lookup.
fn refusal_response(conn: &Connection, req_id: &str, refusal: &Refusal) -> serde_json::Value {
    match refusal {
        Refusal::RoleConflict { teacher_id, held } => err(
            req_id,
            "role_conflict",
            format!(
                "teacher already holds the {} role on this class",
                held.as_str()
            ),
            Some(json!({ "teacherId": teacher_id, "heldRole": held.as_str() })),
        ),
        Refusal::AlreadyAssigned { teacher_id } => err(
            req_id,
            "already_assigned",
            "teacher is already a subject teacher of this class",
            Some(json!({ "teacherId": teacher_id })),
        ),
        Refusal::NotAssigned { teacher_id } => err(
            req_id,
            "not_assigned",
            "teacher is not a subject teacher of this class",
            Some(json!({ "teacherId": teacher_id })),
        ),
        Refusal::NoHomeroom => err(req_id, "no_homeroom", "class has no homeroom teacher", None),
        Refusal::SubjectExclusivity {
            subject_id,
            blocking_teacher_id,
            blocking_teacher_name,
        } => {
            let sname = subject_name(conn, subject_id);
            err(
                req_id,
                "subject_exclusivity",
                format!(
                    "{} already teaches {} in this class",
                    blocking_teacher_name,
                    sname.as_deref().unwrap_or(subject_id)
                ),
                Some(json!({
                    "subjectId": subject_id,
                    "subjectName": sname,
                    "teacherId": blocking_teacher_id,
                    "teacherName": blocking_teacher_name
                })),
            )
        }
    }
}

/// One read-validate-write cycle against a single Class aggregate, retried
/// once if a concurrent writer bumped the version between load and persist.
/// The re-run re-validates against the fresh snapshot, so a refusal that only
/// exists in the new state is still caught.
fn run_class_op(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    op: impl Fn(&mut ClassSnapshot) -> Result<(), Refusal>,
) -> serde_json::Value {
    for _attempt in 0..2 {
        let mut class = match store::load_class(conn, class_id) {
            Ok(Some(c)) => c,
            Ok(None) => return err(&req.id, "not_found", "class not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        if let Err(refusal) = op(&mut class) {
            return refusal_response(conn, &req.id, &refusal);
        }

        match store::persist_class(conn, &class) {
            Ok(PersistOutcome::Saved) => {
                return match queries::class_projection(conn, class_id) {
                    Ok(Some(projection)) => ok(&req.id, projection),
                    Ok(None) => err(&req.id, "not_found", "class not found", None),
                    Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
                };
            }
            Ok(PersistOutcome::Conflict) => continue,
            Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
        }
    }

    err(
        &req.id,
        "conflict",
        "class was modified concurrently; try again",
        Some(json!({ "classId": class_id })),
    )
}

fn handle_assign_homeroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_id) = param_str(req, "classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(teacher_id) = param_str(req, "teacherId") else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };

    let teacher = match store::load_teacher(conn, &teacher_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    run_class_op(conn, req, &class_id, |class| {
        engine::assign_homeroom(class, &teacher)
    })
}

fn handle_clear_homeroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_id) = param_str(req, "classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    run_class_op(conn, req, &class_id, |class| {
        engine::clear_homeroom(class).map(|_outgoing| ())
    })
}

fn handle_add_subject_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_id) = param_str(req, "classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(teacher_id) = param_str(req, "teacherId") else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };

    let teacher = match store::load_teacher(conn, &teacher_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    run_class_op(conn, req, &class_id, |class| {
        engine::add_subject_teacher(class, &teacher)
    })
}

fn handle_remove_subject_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_id) = param_str(req, "classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(teacher_id) = param_str(req, "teacherId") else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };

    let teacher = match store::load_teacher(conn, &teacher_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    run_class_op(conn, req, &class_id, |class| {
        engine::remove_subject_teacher(class, &teacher.id)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "class.assignHomeroom" => Some(handle_assign_homeroom(state, req)),
        "class.clearHomeroom" => Some(handle_clear_homeroom(state, req)),
        "class.addSubjectTeacher" => Some(handle_add_subject_teacher(state, req)),
        "class.removeSubjectTeacher" => Some(handle_remove_subject_teacher(state, req)),
        _ => None,
    }
}
