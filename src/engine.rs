use std::collections::{BTreeMap, BTreeSet};

/// Which role a teacher holds on a class. A (class, teacher) pair is in
/// exactly one of: unassigned, homeroom, subject-teacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Homeroom,
    SubjectTeacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Homeroom => "homeroom",
            Role::SubjectTeacher => "subjectTeacher",
        }
    }
}

/// The slice of a Teacher row the engine needs: identity plus the single
/// subject of specialization, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherRef {
    pub id: String,
    pub name: String,
    pub default_subject_id: Option<String>,
}

/// One Class aggregate as loaded for a single read-validate-write cycle.
/// The snapshot is authoritative for the duration of one operation; nothing
/// reloads relations mid-operation. `version` is the optimistic-concurrency
/// token checked at persist time.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub version: i64,
    pub homeroom: Option<TeacherRef>,
    pub subject_teachers: BTreeMap<String, TeacherRef>,
}

impl ClassSnapshot {
    /// The derived taught-subjects set: union of the homeroom teacher's
    /// default subject and every subject teacher's default subject. Never
    /// stored independently; the store materializes exactly this value in the
    /// same transaction as the relation change.
    pub fn taught_subject_ids(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(h) = &self.homeroom {
            if let Some(s) = &h.default_subject_id {
                out.insert(s.clone());
            }
        }
        for t in self.subject_teachers.values() {
            if let Some(s) = &t.default_subject_id {
                out.insert(s.clone());
            }
        }
        out
    }

    /// Secondary index subject -> supplying teacher. Under the exclusivity
    /// invariant each subject has at most one supplier, so a plain map is
    /// enough; homeroom wins if historical data ever disagrees.
    pub fn subject_suppliers(&self) -> BTreeMap<&str, &TeacherRef> {
        let mut idx: BTreeMap<&str, &TeacherRef> = BTreeMap::new();
        for t in self.subject_teachers.values() {
            if let Some(s) = &t.default_subject_id {
                idx.insert(s.as_str(), t);
            }
        }
        if let Some(h) = &self.homeroom {
            if let Some(s) = &h.default_subject_id {
                idx.insert(s.as_str(), h);
            }
        }
        idx
    }

    /// Who, other than `excluding_teacher`, currently supplies `subject_id`.
    fn other_supplier(&self, subject_id: &str, excluding_teacher: &str) -> Option<&TeacherRef> {
        self.subject_suppliers()
            .get(subject_id)
            .copied()
            .filter(|t| t.id != excluding_teacher)
    }
}

/// A structured refusal. Every variant maps to one wire error code and
/// carries the ids the administrator needs to resolve the conflict; a refusal
/// never mutates the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// Teacher already holds the other role on this class.
    RoleConflict { teacher_id: String, held: Role },
    /// Teacher is already in this class's subject-teacher set.
    AlreadyAssigned { teacher_id: String },
    /// Teacher is not in this class's subject-teacher set.
    NotAssigned { teacher_id: String },
    /// clearHomeroom on a class with no homeroom teacher.
    NoHomeroom,
    /// Another teacher already supplies the same subject to this class.
    SubjectExclusivity {
        subject_id: String,
        blocking_teacher_id: String,
        blocking_teacher_name: String,
    },
}

fn exclusivity_refusal(subject_id: &str, blocking: &TeacherRef) -> Refusal {
    Refusal::SubjectExclusivity {
        subject_id: subject_id.to_string(),
        blocking_teacher_id: blocking.id.clone(),
        blocking_teacher_name: blocking.name.clone(),
    }
}

/// Set the class's homeroom teacher.
///
/// If the incoming teacher currently sits in the subject-teacher set of this
/// class, that edge is removed as part of the same transition: one person
/// never holds two assignment records on one class. The previous homeroom
/// teacher's subject contribution drops out of the derived set automatically
/// unless a remaining subject teacher still supplies it.
pub fn assign_homeroom(class: &mut ClassSnapshot, teacher: &TeacherRef) -> Result<(), Refusal> {
    if class.homeroom.as_ref().map(|h| h.id.as_str()) == Some(teacher.id.as_str()) {
        // Re-assigning the current homeroom teacher is a no-op success.
        return Ok(());
    }

    if let Some(subject_id) = &teacher.default_subject_id {
        // The outgoing homeroom teacher and the incoming teacher's own
        // subject-teacher edge both leave with this transition, so only the
        // remaining subject teachers can block.
        if let Some(blocking) = class
            .subject_teachers
            .values()
            .find(|t| t.id != teacher.id && t.default_subject_id.as_deref() == Some(subject_id))
        {
            return Err(exclusivity_refusal(subject_id, blocking));
        }
    }

    class.subject_teachers.remove(&teacher.id);
    class.homeroom = Some(teacher.clone());
    Ok(())
}

/// Clear the class's homeroom teacher. The outgoing teacher's default subject
/// is orphan-cleaned implicitly: it disappears from the derived set unless a
/// subject teacher still supplies it.
pub fn clear_homeroom(class: &mut ClassSnapshot) -> Result<TeacherRef, Refusal> {
    let Some(outgoing) = class.homeroom.take() else {
        return Err(Refusal::NoHomeroom);
    };
    // Should be impossible under the mutual-exclusivity invariant, but
    // historical data may carry both records; drop the stray edge too.
    class.subject_teachers.remove(&outgoing.id);
    Ok(outgoing)
}

/// Add a teacher to the class's subject-teacher set.
pub fn add_subject_teacher(class: &mut ClassSnapshot, teacher: &TeacherRef) -> Result<(), Refusal> {
    if class.homeroom.as_ref().map(|h| h.id.as_str()) == Some(teacher.id.as_str()) {
        return Err(Refusal::RoleConflict {
            teacher_id: teacher.id.clone(),
            held: Role::Homeroom,
        });
    }
    if class.subject_teachers.contains_key(&teacher.id) {
        return Err(Refusal::AlreadyAssigned {
            teacher_id: teacher.id.clone(),
        });
    }
    if let Some(subject_id) = &teacher.default_subject_id {
        // One class never has two teachers assigned for the same subject,
        // whether the incumbent supplies it as homeroom or as subject teacher.
        if let Some(blocking) = class.other_supplier(subject_id, &teacher.id) {
            return Err(exclusivity_refusal(subject_id, blocking));
        }
    }
    class
        .subject_teachers
        .insert(teacher.id.clone(), teacher.clone());
    Ok(())
}

/// Remove a teacher from the class's subject-teacher set. The homeroom
/// teacher is never removable through this path so the two roles stay
/// distinguishable in the audit trail.
pub fn remove_subject_teacher(class: &mut ClassSnapshot, teacher_id: &str) -> Result<(), Refusal> {
    if class.homeroom.as_ref().map(|h| h.id.as_str()) == Some(teacher_id) {
        return Err(Refusal::RoleConflict {
            teacher_id: teacher_id.to_string(),
            held: Role::Homeroom,
        });
    }
    if class.subject_teachers.remove(teacher_id).is_none() {
        return Err(Refusal::NotAssigned {
            teacher_id: teacher_id.to_string(),
        });
    }
    Ok(())
}

/// Outstanding assignment counts for one teacher across all classes, used by
/// the deletion guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentCounts {
    pub homeroom_classes: i64,
    pub subject_classes: i64,
}

impl AssignmentCounts {
    /// Deletion is safe only when the teacher holds no assignment in either
    /// role; the guard lives at the application layer so unassignment has to
    /// run (and orphan-clean) before the row can go.
    pub fn deletable(self) -> bool {
        self.homeroom_classes == 0 && self.subject_classes == 0
    }
}
