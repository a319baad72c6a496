use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::bail;

use crate::catalog::Catalogs;
use crate::delim::{self, AliasTable, Field};
use crate::engine::BatchEngine;
use crate::model::{
    ImportKind, ImportRunState, ImportSummary, Phase, RowAdjustment, RowError,
};
use crate::normalize::Normalizer;
use crate::progress::{ProgressEvent, Throttle};
use crate::store::ImportStore;
use crate::translate::Translator;

pub struct ImportOptions {
    pub batch_size: usize,
    pub progress_interval: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: 200,
            progress_interval: Duration::from_millis(200),
        }
    }
}

/// Suspension-point spacing while normalizing very large inputs.
const ROW_CHUNK: usize = 500;

fn emit(
    throttle: &mut Throttle,
    sink: &mut dyn FnMut(ProgressEvent),
    state: &ImportRunState,
    log: String,
    force: bool,
) {
    if throttle.ready(force) {
        sink(ProgressEvent::from_state(state, log));
    }
}

/// Runs one import over the supplied catalog snapshot and store.
///
/// Returns `Err` only for a FatalError before processing starts (unreadable
/// input, unrecognizable header set). Row-level and batch-level trouble is
/// carried inside the summary; cancellation is cooperative and checked at
/// batch and chunk boundaries, so a batch in flight always completes.
/// Re-running the same text is idempotent: deterministic record ids make the
/// second run overwrite instead of duplicate.
pub fn run_import(
    text: &str,
    catalogs: &Catalogs,
    aliases: &AliasTable,
    store: &mut dyn ImportStore,
    opts: &ImportOptions,
    sink: &mut dyn FnMut(ProgressEvent),
    cancel: &AtomicBool,
) -> anyhow::Result<ImportSummary> {
    let mut state = ImportRunState::new();
    let mut throttle = Throttle::new(opts.progress_interval);
    emit(&mut throttle, sink, &state, "parsing input".to_string(), true);

    let table = delim::parse(text)?;
    let columns = delim::resolve_headers(&table.headers, aliases);
    let kind = if columns.contains_key(&Field::Score) {
        ImportKind::Grades
    } else if columns.contains_key(&Field::Status) {
        ImportKind::Attendance
    } else {
        bail!("unrecognized header set: no score or status column");
    };

    let translator = Translator::build(catalogs);
    let normalizer = Normalizer::new(&translator, &columns, kind);

    state.phase = Phase::Normalizing;
    state.total = table.rows.len();
    emit(
        &mut throttle,
        sink,
        &state,
        format!("normalizing {} {} rows", state.total, kind.as_str()),
        true,
    );

    let mut engine = BatchEngine::new(store, opts.batch_size);
    let mut row_errors: Vec<RowError> = Vec::new();
    let mut adjustments: Vec<RowAdjustment> = Vec::new();
    let mut cancelled = false;

    for row in &table.rows {
        match normalizer.normalize_row(row) {
            Ok(mut normalized) => {
                adjustments.append(&mut normalized.adjustments);
                engine.push(normalized.record);
            }
            Err(e) => row_errors.push(e),
        }
        state.processed += 1;

        if engine.ready_to_flush() {
            state.phase = Phase::Writing;
            let report = engine.flush();
            state.created = engine.created;
            state.duplicates = engine.duplicates;
            state.errors = row_errors.len() + engine.error_ids.len();
            emit(
                &mut throttle,
                sink,
                &state,
                format!(
                    "flushed {} records ({} new, {} updated, {} failed)",
                    report.attempted, report.created, report.updated, report.failed
                ),
                false,
            );
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
        } else if state.processed % ROW_CHUNK == 0 {
            state.errors = row_errors.len() + engine.error_ids.len();
            emit(
                &mut throttle,
                sink,
                &state,
                format!("processed {}/{} rows", state.processed, state.total),
                false,
            );
            thread::yield_now();
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
        }
    }

    if !cancelled {
        state.phase = Phase::Writing;
        let report = engine.flush();
        if report.attempted > 0 {
            state.created = engine.created;
            state.duplicates = engine.duplicates;
            state.errors = row_errors.len() + engine.error_ids.len();
            emit(
                &mut throttle,
                sink,
                &state,
                format!(
                    "flushed {} records ({} new, {} updated, {} failed)",
                    report.attempted, report.created, report.updated, report.failed
                ),
                false,
            );
        }
    }

    state.created = engine.created;
    state.duplicates = engine.duplicates;
    state.errors = row_errors.len() + engine.error_ids.len();
    state.phase = if cancelled { Phase::Failed } else { Phase::Done };
    emit(
        &mut throttle,
        sink,
        &state,
        if cancelled {
            "import cancelled".to_string()
        } else {
            format!(
                "import complete: {} created, {} duplicates, {} errors",
                state.created, state.duplicates, state.errors
            )
        },
        true,
    );

    Ok(ImportSummary {
        total_rows: table.rows.len(),
        created: state.created,
        duplicates: state.duplicates,
        errors: state.errors,
        row_errors,
        adjustments,
        cancelled,
    })
}
