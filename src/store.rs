use rusqlite::{Connection, OptionalExtension};

use crate::model::{ImportKind, Record};

#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    pub created: usize,
    pub updated: usize,
    pub failed_ids: Vec<String>,
}

/// Storage-backend interface the pipeline writes through. The engine never
/// names a concrete store; `updated` is what lets a re-import report
/// duplicates instead of creations.
pub trait ImportStore {
    fn upsert_batch(&mut self, records: &[Record]) -> anyhow::Result<BatchOutcome>;
    fn count_by_year(&self, kind: ImportKind, year: i32) -> anyhow::Result<i64>;
    fn delete_by_year(&mut self, kind: ImportKind, year: i32) -> anyhow::Result<i64>;
}

fn table_for(kind: ImportKind) -> (&'static str, &'static str) {
    match kind {
        ImportKind::Grades => ("grade_records", "graded_at"),
        ImportKind::Attendance => ("attendance_records", "date"),
    }
}

/// Workspace-SQLite adapter. One transaction per batch; a record that fails
/// inside the batch is reported by id, the rest of the batch still lands.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> SqliteStore<'c> {
        SqliteStore { conn }
    }
}

impl ImportStore for SqliteStore<'_> {
    fn upsert_batch(&mut self, records: &[Record]) -> anyhow::Result<BatchOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = BatchOutcome::default();
        {
            let mut grade_exists = tx.prepare("SELECT 1 FROM grade_records WHERE id = ?")?;
            let mut attendance_exists =
                tx.prepare("SELECT 1 FROM attendance_records WHERE id = ?")?;
            let mut grade_upsert = tx.prepare(
                "INSERT INTO grade_records(
                   id, person_id, course_id, section_id, subject_id, kind, score, graded_at, title, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
                 ON CONFLICT(id) DO UPDATE SET
                   person_id = excluded.person_id,
                   course_id = excluded.course_id,
                   section_id = excluded.section_id,
                   subject_id = excluded.subject_id,
                   kind = excluded.kind,
                   score = excluded.score,
                   graded_at = excluded.graded_at,
                   title = excluded.title,
                   updated_at = excluded.updated_at",
            )?;
            let mut attendance_upsert = tx.prepare(
                "INSERT INTO attendance_records(
                   id, person_id, course_id, section_id, date, status, comment, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, datetime('now'))
                 ON CONFLICT(id) DO UPDATE SET
                   person_id = excluded.person_id,
                   course_id = excluded.course_id,
                   section_id = excluded.section_id,
                   date = excluded.date,
                   status = excluded.status,
                   comment = excluded.comment,
                   updated_at = excluded.updated_at",
            )?;

            let mut write_one = |rec: &Record| -> rusqlite::Result<bool> {
                match rec {
                    Record::Grade(g) => {
                        let existed = grade_exists
                            .query_row([&g.id], |_| Ok(()))
                            .optional()?
                            .is_some();
                        grade_upsert.execute((
                            &g.id,
                            g.person_id.to_string(),
                            g.course_id.to_string(),
                            g.section_id.to_string(),
                            &g.subject_id,
                            g.kind.as_str(),
                            g.score,
                            g.graded_at.format("%Y-%m-%d").to_string(),
                            &g.title,
                        ))?;
                        Ok(existed)
                    }
                    Record::Attendance(a) => {
                        let existed = attendance_exists
                            .query_row([&a.id], |_| Ok(()))
                            .optional()?
                            .is_some();
                        attendance_upsert.execute((
                            &a.id,
                            a.person_id.to_string(),
                            a.course_id.to_string(),
                            a.section_id.to_string(),
                            a.date.format("%Y-%m-%d").to_string(),
                            a.status.as_str(),
                            a.comment.as_deref(),
                        ))?;
                        Ok(existed)
                    }
                }
            };

            for rec in records {
                match write_one(rec) {
                    Ok(true) => outcome.updated += 1,
                    Ok(false) => outcome.created += 1,
                    Err(_) => outcome.failed_ids.push(rec.id().to_string()),
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn count_by_year(&self, kind: ImportKind, year: i32) -> anyhow::Result<i64> {
        let (table, col) = table_for(kind);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE substr({}, 1, 4) = ?", table, col);
        let n = self
            .conn
            .query_row(&sql, [format!("{:04}", year)], |r| r.get::<_, i64>(0))?;
        Ok(n)
    }

    fn delete_by_year(&mut self, kind: ImportKind, year: i32) -> anyhow::Result<i64> {
        let (table, col) = table_for(kind);
        let sql = format!("DELETE FROM {} WHERE substr({}, 1, 4) = ?", table, col);
        let n = self.conn.execute(&sql, [format!("{:04}", year)])?;
        Ok(n as i64)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{AttendanceRecord, AttendanceStatus, GradeKind, GradeRecord};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn temp_workspace() -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "aulad-store-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn grade(id: &str, score: i64, graded_at: &str) -> Record {
        Record::Grade(GradeRecord {
            id: id.to_string(),
            person_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            subject_id: "matematicas".into(),
            kind: GradeKind::Quiz,
            score,
            graded_at: NaiveDate::parse_from_str(graded_at, "%Y-%m-%d").expect("date"),
            title: "Matemáticas".into(),
        })
    }

    fn attendance(id: &str, date: &str) -> Record {
        Record::Attendance(AttendanceRecord {
            id: id.to_string(),
            person_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("date"),
            status: AttendanceStatus::Present,
            comment: None,
        })
    }

    #[test]
    fn sqlite_upsert_distinguishes_created_from_updated() {
        let ws = temp_workspace();
        let conn = db::open_db(&ws).expect("open db");
        let mut store = SqliteStore::new(&conn);

        let out = store
            .upsert_batch(&[grade("g1", 70, "2025-03-05"), grade("g2", 80, "2025-03-06")])
            .expect("upsert");
        assert_eq!(out.created, 2);
        assert_eq!(out.updated, 0);
        assert!(out.failed_ids.is_empty());

        let out = store
            .upsert_batch(&[grade("g1", 99, "2025-03-05")])
            .expect("upsert");
        assert_eq!(out.created, 0);
        assert_eq!(out.updated, 1);

        let score: i64 = conn
            .query_row("SELECT score FROM grade_records WHERE id = 'g1'", [], |r| {
                r.get(0)
            })
            .expect("query");
        assert_eq!(score, 99);
    }

    #[test]
    fn sqlite_count_and_delete_are_scoped_by_kind_and_year() {
        let ws = temp_workspace();
        let conn = db::open_db(&ws).expect("open db");
        let mut store = SqliteStore::new(&conn);

        store
            .upsert_batch(&[
                grade("g1", 70, "2025-03-05"),
                grade("g2", 80, "2024-11-20"),
                attendance("a1", "2025-03-05"),
            ])
            .expect("upsert");

        assert_eq!(store.count_by_year(ImportKind::Grades, 2025).expect("count"), 1);
        assert_eq!(store.count_by_year(ImportKind::Grades, 2024).expect("count"), 1);
        assert_eq!(
            store.count_by_year(ImportKind::Attendance, 2025).expect("count"),
            1
        );

        let deleted = store
            .delete_by_year(ImportKind::Grades, 2025)
            .expect("delete");
        assert_eq!(deleted, 1);
        assert_eq!(store.count_by_year(ImportKind::Grades, 2025).expect("count"), 0);
        // Attendance for the same year is untouched.
        assert_eq!(
            store.count_by_year(ImportKind::Attendance, 2025).expect("count"),
            1
        );
    }
}
