use std::collections::{HashMap, HashSet};
use std::thread;

use crate::model::Record;
use crate::store::ImportStore;

#[derive(Debug, Default, Clone)]
pub struct FlushReport {
    pub attempted: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Accumulates normalized records keyed by their deterministic id and writes
/// them to the store in bounded, strictly sequential batches. Sequential
/// flushing is what keeps last-one-wins well-defined; there is deliberately
/// no parallel batch writing.
pub struct BatchEngine<'a> {
    store: &'a mut dyn ImportStore,
    batch_size: usize,
    records: HashMap<String, Record>,
    pending: Vec<String>,
    pending_set: HashSet<String>,
    pub created: usize,
    pub duplicates: usize,
    pub error_ids: Vec<String>,
}

impl<'a> BatchEngine<'a> {
    pub fn new(store: &'a mut dyn ImportStore, batch_size: usize) -> BatchEngine<'a> {
        BatchEngine {
            store,
            batch_size: batch_size.max(1),
            records: HashMap::new(),
            pending: Vec::new(),
            pending_set: HashSet::new(),
            created: 0,
            duplicates: 0,
            error_ids: Vec::new(),
        }
    }

    /// Same-run duplicates coalesce in place, last one wins. An id that was
    /// already flushed gets queued again so the overwrite reaches the store.
    pub fn push(&mut self, record: Record) {
        let id = record.id().to_string();
        if self.records.insert(id.clone(), record).is_some() {
            self.duplicates += 1;
        }
        if self.pending_set.insert(id.clone()) {
            self.pending.push(id);
        }
    }

    pub fn ready_to_flush(&self) -> bool {
        self.pending.len() >= self.batch_size
    }

    /// Writes everything pending as one batch. A transport error is retried
    /// once immediately; a batch that still fails marks its ids as errors and
    /// the run continues with the rest of the stream.
    pub fn flush(&mut self) -> FlushReport {
        if self.pending.is_empty() {
            return FlushReport::default();
        }
        let ids: Vec<String> = self.pending.drain(..).collect();
        self.pending_set.clear();
        let batch: Vec<Record> = ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();

        let mut report = FlushReport {
            attempted: batch.len(),
            ..FlushReport::default()
        };
        let outcome = match self.store.upsert_batch(&batch) {
            Ok(o) => Some(o),
            Err(_) => self.store.upsert_batch(&batch).ok(),
        };
        match outcome {
            Some(o) => {
                report.created = o.created;
                report.updated = o.updated;
                report.failed = o.failed_ids.len();
                self.created += o.created;
                self.duplicates += o.updated;
                self.error_ids.extend(o.failed_ids);
            }
            None => {
                report.failed = ids.len();
                self.error_ids.extend(ids);
            }
        }

        // Suspension point between batches; bounds how long the engine can
        // hog its worker.
        thread::yield_now();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GradeKind, GradeRecord};
    use crate::store::testing::{FlakyStore, MemoryStore, PoisonStore};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn grade(id: &str, score: i64) -> Record {
        Record::Grade(GradeRecord {
            id: id.to_string(),
            person_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            subject_id: "matematicas".into(),
            kind: GradeKind::Assignment,
            score,
            graded_at: NaiveDate::parse_from_str("2025-03-05", "%Y-%m-%d").expect("date"),
            title: "Matemáticas".into(),
        })
    }

    #[test]
    fn same_run_duplicates_coalesce_last_one_wins() {
        let mut store = MemoryStore::default();
        let mut engine = BatchEngine::new(&mut store, 10);
        engine.push(grade("g1", 40));
        engine.push(grade("g1", 95));
        engine.push(grade("g2", 70));
        let report = engine.flush();

        assert_eq!(report.attempted, 2);
        assert_eq!(engine.duplicates, 1);
        assert_eq!(engine.created, 2);
        let Record::Grade(g) = &store.records["g1"] else {
            panic!("expected grade record");
        };
        assert_eq!(g.score, 95);
    }

    #[test]
    fn overwrite_of_an_already_flushed_id_is_written_again() {
        let mut store = MemoryStore::default();
        let mut engine = BatchEngine::new(&mut store, 1);
        engine.push(grade("g1", 40));
        assert!(engine.ready_to_flush());
        engine.flush();

        engine.push(grade("g1", 88));
        assert!(engine.ready_to_flush());
        engine.flush();

        // The second write is a store-level update, counted as a duplicate.
        assert_eq!(engine.duplicates, 2);
        assert_eq!(engine.created, 1);
        let Record::Grade(g) = &store.records["g1"] else {
            panic!("expected grade record");
        };
        assert_eq!(g.score, 88);
    }

    #[test]
    fn flush_waits_for_batch_size_new_entries() {
        let mut store = MemoryStore::default();
        let mut engine = BatchEngine::new(&mut store, 3);
        engine.push(grade("g1", 10));
        engine.push(grade("g2", 20));
        assert!(!engine.ready_to_flush());
        engine.push(grade("g3", 30));
        assert!(engine.ready_to_flush());
        engine.flush();
        assert_eq!(store.batches, 1);
        assert_eq!(store.records.len(), 3);
    }

    #[test]
    fn transient_failure_is_retried_once_and_recovers() {
        let mut store = FlakyStore {
            inner: MemoryStore::default(),
            failures_left: 1,
            calls: 0,
        };
        let mut engine = BatchEngine::new(&mut store, 10);
        engine.push(grade("g1", 50));
        let report = engine.flush();

        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 0);
        assert!(engine.error_ids.is_empty());
        assert_eq!(store.calls, 2);
        assert_eq!(store.inner.records.len(), 1);
    }

    #[test]
    fn persistently_failing_batch_is_skipped_not_fatal() {
        let mut store = PoisonStore {
            inner: MemoryStore::default(),
            poison_id: "g2".into(),
            attempts: 0,
        };
        let mut engine = BatchEngine::new(&mut store, 10);
        engine.push(grade("g1", 10));
        engine.push(grade("g2", 20));
        let report = engine.flush();
        assert_eq!(report.failed, 2);
        assert_eq!(engine.error_ids, vec!["g1".to_string(), "g2".to_string()]);
        assert_eq!(store.attempts, 2);

        // The engine keeps accepting and writing subsequent batches.
        engine.push(grade("g3", 30));
        let report = engine.flush();
        assert_eq!(report.created, 1);
        assert_eq!(store.inner.records.len(), 1);
    }
}
