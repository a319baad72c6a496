use std::collections::HashMap;

use chrono::NaiveDate;

use crate::delim::{Field, Row};
use crate::model::{
    attendance_record_id, grade_record_id, AttendanceRecord, AttendanceStatus, GradeKind,
    GradeRecord, ImportKind, Record, RowAdjustment, RowError,
};
use crate::translate::{slug, slug_underscore, Translator};

#[derive(Debug)]
pub struct NormalizedRow {
    pub record: Record,
    pub adjustments: Vec<RowAdjustment>,
}

/// Turns one parsed row into a validated domain record, or a RowError that
/// names the offending value. A failed row never aborts the batch.
pub struct Normalizer<'a> {
    translator: &'a Translator,
    columns: &'a HashMap<Field, usize>,
    kind: ImportKind,
}

fn row_error(row: &Row, reason: &str, value: Option<&str>) -> RowError {
    RowError {
        row_index: row.row_index,
        reason: reason.to_string(),
        value: value.map(|v| v.to_string()),
        raw_row: row.raw.clone(),
    }
}

/// Accepts ISO and the two day-first forms the exports use. Anything else is
/// a row error, never a silent default.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    None
}

/// Scores arrive with either decimal separator.
fn parse_score(raw: &str) -> Option<f64> {
    let s = raw.replace(',', ".");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_grade_kind(raw: &str) -> Option<GradeKind> {
    match slug(raw).as_str() {
        "tarea" | "assignment" => Some(GradeKind::Assignment),
        "prueba" | "quiz" | "test" => Some(GradeKind::Quiz),
        "evaluacion" | "examen" | "exam" => Some(GradeKind::Exam),
        _ => None,
    }
}

fn parse_status(raw: &str) -> Option<AttendanceStatus> {
    match slug(raw).as_str() {
        "p" | "presente" | "present" => Some(AttendanceStatus::Present),
        "a" | "ausente" | "absent" => Some(AttendanceStatus::Absent),
        "t" | "atrasado" | "tarde" | "late" => Some(AttendanceStatus::Late),
        "j" | "justificado" | "excused" => Some(AttendanceStatus::Excused),
        _ => None,
    }
}

impl<'a> Normalizer<'a> {
    pub fn new(
        translator: &'a Translator,
        columns: &'a HashMap<Field, usize>,
        kind: ImportKind,
    ) -> Normalizer<'a> {
        Normalizer {
            translator,
            columns,
            kind,
        }
    }

    fn field<'r>(&self, row: &'r Row, f: Field) -> Option<&'r str> {
        self.columns
            .get(&f)
            .and_then(|i| row.fields.get(*i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn required<'r>(&self, row: &'r Row, f: Field) -> Result<&'r str, RowError> {
        self.field(row, f)
            .ok_or_else(|| row_error(row, "missing_field", Some(f.as_str())))
    }

    pub fn normalize_row(&self, row: &Row) -> Result<NormalizedRow, RowError> {
        let course_raw = self.required(row, Field::Course)?;
        let course_id = self
            .translator
            .resolve_course(course_raw)
            .ok_or_else(|| row_error(row, "unknown_course", Some(course_raw)))?;

        let section_raw = self.required(row, Field::Section)?;
        let section_id = self
            .translator
            .resolve_section(course_raw, section_raw)
            .ok_or_else(|| {
                row_error(
                    row,
                    "unknown_section",
                    Some(&format!("{}/{}", course_raw, section_raw)),
                )
            })?;

        // Identity: national id or username first, then the enrollment-scoped
        // display-name fallback.
        let id_raw = self.field(row, Field::StudentId);
        let name_raw = self.field(row, Field::Name);
        if id_raw.is_none() && name_raw.is_none() {
            return Err(row_error(row, "missing_field", Some(Field::StudentId.as_str())));
        }
        let person_id = id_raw
            .and_then(|v| self.translator.resolve_person(Some(v), Some(v)))
            .or_else(|| {
                name_raw.and_then(|n| self.translator.resolve_person_in_section(n, section_id))
            })
            .ok_or_else(|| row_error(row, "unknown_person", id_raw.or(name_raw)))?;

        let date_raw = self.required(row, Field::Date)?;
        let date = parse_date(date_raw)
            .ok_or_else(|| row_error(row, "unparseable_date", Some(date_raw)))?;

        let mut adjustments = Vec::new();
        let record = match self.kind {
            ImportKind::Grades => {
                let score_raw = self.required(row, Field::Score)?;
                let score = parse_score(score_raw)
                    .ok_or_else(|| row_error(row, "bad_score", Some(score_raw)))?;
                let rounded = score.round() as i64;
                // Zero and negative scores are data-entry artifacts here, so
                // the floor is 1, not 0. The clamp is tolerated, not silent.
                let clamped = rounded.clamp(1, 100);
                if clamped != rounded {
                    adjustments.push(RowAdjustment {
                        row_index: row.row_index,
                        field: "score".to_string(),
                        original: score_raw.to_string(),
                        applied: clamped.to_string(),
                    });
                }

                let kind = match self.field(row, Field::Kind) {
                    Some(raw) => parse_grade_kind(raw)
                        .ok_or_else(|| row_error(row, "unknown_kind", Some(raw)))?,
                    None => GradeKind::Assignment,
                };

                let subject_raw = self.field(row, Field::Subject).unwrap_or("");
                let subject_id = slug_underscore(subject_raw);
                let title = if subject_raw.is_empty() {
                    kind.as_str().to_string()
                } else {
                    subject_raw.to_string()
                };

                Record::Grade(GradeRecord {
                    id: grade_record_id(&person_id, &course_id, &section_id, &subject_id, kind, date),
                    person_id,
                    course_id,
                    section_id,
                    subject_id,
                    kind,
                    score: clamped,
                    graded_at: date,
                    title,
                })
            }
            ImportKind::Attendance => {
                let status_raw = self.required(row, Field::Status)?;
                let status = parse_status(status_raw)
                    .ok_or_else(|| row_error(row, "unknown_status", Some(status_raw)))?;
                let comment = self.field(row, Field::Comment).map(|s| s.to_string());

                Record::Attendance(AttendanceRecord {
                    id: attendance_record_id(&person_id, &section_id, date),
                    person_id,
                    course_id,
                    section_id,
                    date,
                    status,
                    comment,
                })
            }
        };

        Ok(NormalizedRow { record, adjustments })
    }
}
