use crate::engine::{AssignmentCounts, ClassSnapshot, TeacherRef};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;

pub fn load_teacher(conn: &Connection, teacher_id: &str) -> anyhow::Result<Option<TeacherRef>> {
    let row = conn
        .query_row(
            "SELECT id, name, default_subject_id FROM teachers WHERE id = ?",
            [teacher_id],
            |r| {
                Ok(TeacherRef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    default_subject_id: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Load one Class aggregate: the row, the homeroom teacher reference, and the
/// full subject-teacher set. This snapshot is the authoritative state for the
/// whole read-validate-write cycle; no operation re-reads relations after this.
pub fn load_class(conn: &Connection, class_id: &str) -> anyhow::Result<Option<ClassSnapshot>> {
    let head = conn
        .query_row(
            "SELECT id, name, capacity, version, homeroom_teacher_id
             FROM classes WHERE id = ?",
            [class_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()?;
    let Some((id, name, capacity, version, homeroom_id)) = head else {
        return Ok(None);
    };

    let homeroom = match homeroom_id {
        Some(tid) => load_teacher(conn, &tid)?,
        None => None,
    };

    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.default_subject_id
         FROM class_subject_teachers cst
         JOIN teachers t ON t.id = cst.teacher_id
         WHERE cst.class_id = ?
         ORDER BY t.id",
    )?;
    let teachers = stmt
        .query_map([&id], |r| {
            Ok(TeacherRef {
                id: r.get(0)?,
                name: r.get(1)?,
                default_subject_id: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut subject_teachers = BTreeMap::new();
    for t in teachers {
        subject_teachers.insert(t.id.clone(), t);
    }

    Ok(Some(ClassSnapshot {
        id,
        name,
        capacity,
        version,
        homeroom,
        subject_teachers,
    }))
}

#[derive(Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    /// Another writer bumped the class version between our load and this
    /// write; nothing was changed.
    Conflict,
}

/// Write back a mutated snapshot: homeroom reference, subject-teacher edges,
/// and the rewritten taught-subjects set, all in one transaction guarded by
/// the version the snapshot was loaded with. Zero rows on the head update
/// means a concurrent writer won; the transaction is rolled back untouched.
pub fn persist_class(conn: &Connection, class: &ClassSnapshot) -> anyhow::Result<PersistOutcome> {
    let tx = conn.unchecked_transaction()?;
    let now = chrono::Utc::now().to_rfc3339();

    let updated = tx.execute(
        "UPDATE classes
         SET homeroom_teacher_id = ?, version = version + 1, updated_at = ?
         WHERE id = ? AND version = ?",
        (
            class.homeroom.as_ref().map(|h| h.id.as_str()),
            &now,
            &class.id,
            class.version,
        ),
    )?;
    if updated == 0 {
        tx.rollback()?;
        return Ok(PersistOutcome::Conflict);
    }

    tx.execute(
        "DELETE FROM class_subject_teachers WHERE class_id = ?",
        [&class.id],
    )?;
    for teacher_id in class.subject_teachers.keys() {
        tx.execute(
            "INSERT INTO class_subject_teachers(class_id, teacher_id) VALUES(?, ?)",
            (&class.id, teacher_id),
        )?;
    }

    tx.execute(
        "DELETE FROM class_taught_subjects WHERE class_id = ?",
        [&class.id],
    )?;
    for subject_id in class.taught_subject_ids() {
        tx.execute(
            "INSERT INTO class_taught_subjects(class_id, subject_id) VALUES(?, ?)",
            (&class.id, &subject_id),
        )?;
    }

    tx.commit()?;
    Ok(PersistOutcome::Saved)
}

/// Outstanding assignments per role for the deletion guard.
pub fn assignment_counts(conn: &Connection, teacher_id: &str) -> anyhow::Result<AssignmentCounts> {
    let homeroom_classes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM classes WHERE homeroom_teacher_id = ?",
        [teacher_id],
        |r| r.get(0),
    )?;
    let subject_classes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM class_subject_teachers WHERE teacher_id = ?",
        [teacher_id],
        |r| r.get(0),
    )?;
    Ok(AssignmentCounts {
        homeroom_classes,
        subject_classes,
    })
}
