use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Which record family an import file carries. Detected from the header row:
/// a score column selects grades, a status column selects attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Grades,
    Attendance,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Grades => "grades",
            ImportKind::Attendance => "attendance",
        }
    }

    pub fn parse(s: &str) -> Option<ImportKind> {
        match s.trim() {
            "grades" => Some(ImportKind::Grades),
            "attendance" => Some(ImportKind::Attendance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeKind {
    Assignment,
    Quiz,
    Exam,
}

impl GradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeKind::Assignment => "assignment",
            GradeKind::Quiz => "quiz",
            GradeKind::Exam => "exam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub id: String,
    pub person_id: Uuid,
    pub course_id: Uuid,
    pub section_id: Uuid,
    pub subject_id: String,
    pub kind: GradeKind,
    pub score: i64,
    pub graded_at: NaiveDate,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: String,
    pub person_id: Uuid,
    pub course_id: Uuid,
    pub section_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Grade(GradeRecord),
    Attendance(AttendanceRecord),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Record::Grade(g) => &g.id,
            Record::Attendance(a) => &a.id,
        }
    }
}

/// Record ids are derived purely from the logical-identity fields so a
/// re-import of the same fact collides on id instead of duplicating.
fn logical_id(prefix: char, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(33);
    out.push(prefix);
    for b in digest.iter().take(16) {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn grade_record_id(
    person_id: &Uuid,
    course_id: &Uuid,
    section_id: &Uuid,
    subject_id: &str,
    kind: GradeKind,
    graded_at: NaiveDate,
) -> String {
    logical_id(
        'g',
        &[
            &person_id.to_string(),
            &course_id.to_string(),
            &section_id.to_string(),
            subject_id,
            kind.as_str(),
            &graded_at.format("%Y-%m-%d").to_string(),
        ],
    )
}

/// At most one attendance fact per person per section per day.
pub fn attendance_record_id(person_id: &Uuid, section_id: &Uuid, date: NaiveDate) -> String {
    logical_id(
        'a',
        &[
            &person_id.to_string(),
            &section_id.to_string(),
            &date.format("%Y-%m-%d").to_string(),
        ],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Parsing,
    Normalizing,
    Writing,
    Done,
    Failed,
}

/// Row-level failure. Never aborts the run; retained for the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_index: usize,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub raw_row: String,
}

/// Audit-trail entry for tolerated corrections (score clamping).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowAdjustment {
    pub row_index: usize,
    pub field: String,
    pub original: String,
    pub applied: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRunState {
    pub phase: Phase,
    pub total: usize,
    pub processed: usize,
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl ImportRunState {
    pub fn new() -> Self {
        ImportRunState {
            phase: Phase::Parsing,
            total: 0,
            processed: 0,
            created: 0,
            duplicates: 0,
            errors: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total_rows: usize,
    pub created: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub row_errors: Vec<RowError>,
    pub adjustments: Vec<RowAdjustment>,
    pub cancelled: bool,
}
