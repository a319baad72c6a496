use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::catalog;
use crate::db;
use crate::delim::AliasTable;
use crate::import::{self, ImportOptions};
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::types::{lock_or_recover, AppState, Request, RunHandle};
use crate::model::{ImportKind, ImportRunState, Phase};
use crate::progress::ProgressEvent;
use crate::store::{ImportStore, SqliteStore};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.run" => Some(handle_run(state, req)),
        "import.status" => Some(handle_status(state, req)),
        "import.cancel" => Some(handle_cancel(state, req)),
        "records.countByYear" => Some(handle_count_by_year(state, req)),
        "records.deleteByYear" => Some(handle_delete_by_year(state, req)),
        _ => None,
    }
}

fn emit_event(emitter: &Sender<String>, value: serde_json::Value) {
    if let Ok(line) = serde_json::to_string(&value) {
        let _ = emitter.send(line);
    }
}

/// Starts one import run on a background worker thread and returns its id
/// immediately. The worker opens its own connection to the workspace file;
/// progress flows out as `import.progress` events, completion as
/// `import.done` (or `import.failed` for a FatalError).
fn handle_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // One run at a time: the Translator maps are a run-scoped snapshot and
    // batches must flush sequentially.
    if state
        .active_run
        .as_ref()
        .map(|r| !r.is_finished())
        .unwrap_or(false)
    {
        return err(
            &req.id,
            "import_in_progress",
            "an import run is already active",
            None,
        );
    }

    let Some(text) = req
        .params
        .get("text")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
    else {
        return bad_params(&req.id, "missing params.text");
    };
    let batch_size = req
        .params
        .get("batchSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(200)
        .max(1) as usize;
    let progress_interval = req
        .params
        .get("progressIntervalMs")
        .and_then(|v| v.as_u64())
        .unwrap_or(200);

    let run_id = Uuid::new_v4().to_string();
    let run_state = Arc::new(Mutex::new(ImportRunState::new()));
    let summary_slot = Arc::new(Mutex::new(None));
    let cancel = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let emitter = state.emitter.clone();

    let worker = {
        let run_id = run_id.clone();
        let run_state = Arc::clone(&run_state);
        let summary_slot = Arc::clone(&summary_slot);
        let cancel = Arc::clone(&cancel);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            let opts = ImportOptions {
                batch_size,
                progress_interval: Duration::from_millis(progress_interval),
            };
            let result = (|| {
                let conn = db::open_db(&workspace)?;
                let catalogs = catalog::load_from_db(&conn)?;
                let mut store = SqliteStore::new(&conn);
                let mut sink = |ev: ProgressEvent| {
                    {
                        let mut st = lock_or_recover(&run_state);
                        st.phase = ev.phase;
                        st.total = ev.total;
                        st.processed = ev.processed;
                        st.created = ev.created;
                        st.duplicates = ev.duplicates;
                        st.errors = ev.errors;
                    }
                    if let Ok(mut v) = serde_json::to_value(&ev) {
                        v["event"] = json!("import.progress");
                        v["runId"] = json!(run_id);
                        emit_event(&emitter, v);
                    }
                };
                import::run_import(
                    &text,
                    &catalogs,
                    &AliasTable::spanish_default(),
                    &mut store,
                    &opts,
                    &mut sink,
                    &cancel,
                )
            })();

            // Summary first, finished flag second, terminal event last: a
            // caller who saw the event observes a settled run.
            match result {
                Ok(summary) => {
                    let payload = serde_json::to_value(&summary).ok();
                    *lock_or_recover(&summary_slot) = Some(summary);
                    finished.store(true, Ordering::SeqCst);
                    if let Some(s) = payload {
                        emit_event(
                            &emitter,
                            json!({ "event": "import.done", "runId": run_id, "summary": s }),
                        );
                    }
                }
                Err(e) => {
                    lock_or_recover(&run_state).phase = Phase::Failed;
                    finished.store(true, Ordering::SeqCst);
                    emit_event(
                        &emitter,
                        json!({
                            "event": "import.failed",
                            "runId": run_id,
                            "message": e.to_string()
                        }),
                    );
                }
            }
        })
    };

    state.active_run = Some(RunHandle {
        run_id: run_id.clone(),
        state: run_state,
        summary: summary_slot,
        cancel,
        finished,
        join: Some(worker),
    });

    ok(&req.id, json!({ "runId": run_id }))
}

fn require_run<'s>(
    state: &'s AppState,
    req: &Request,
) -> Result<&'s RunHandle, serde_json::Value> {
    let Some(run) = state.active_run.as_ref() else {
        return Err(err(&req.id, "no_run", "no import run in this session", None));
    };
    if let Some(want) = req.params.get("runId").and_then(|v| v.as_str()) {
        if want != run.run_id {
            return Err(err(&req.id, "not_found", "unknown runId", None));
        }
    }
    Ok(run)
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let run = match require_run(state, req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let snapshot = lock_or_recover(&run.state).clone();
    let summary = lock_or_recover(&run.summary).clone();
    let mut result = json!({
        "runId": run.run_id,
        "done": run.is_finished(),
        "state": serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({})),
    });
    if let Some(s) = summary {
        result["summary"] = serde_json::to_value(&s).unwrap_or_else(|_| json!({}));
    }
    ok(&req.id, result)
}

fn handle_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let run = match require_run(state, req) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    // Cooperative: the worker checks between batches, so the batch in flight
    // still completes before the run winds down.
    run.cancel.store(true, Ordering::Relaxed);
    ok(
        &req.id,
        json!({ "runId": run.run_id, "cancelRequested": true }),
    )
}

fn parse_kind_and_year(req: &Request) -> Result<(ImportKind, i32), serde_json::Value> {
    let kind = req
        .params
        .get("kind")
        .and_then(|v| v.as_str())
        .and_then(ImportKind::parse);
    let Some(kind) = kind else {
        return Err(bad_params(
            &req.id,
            "kind must be \"grades\" or \"attendance\"",
        ));
    };
    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return Err(bad_params(&req.id, "missing params.year"));
    };
    Ok((kind, year as i32))
}

fn handle_count_by_year(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (kind, year) = match parse_kind_and_year(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let store = SqliteStore::new(conn);
    match store.count_by_year(kind, year) {
        Ok(n) => ok(&req.id, json!({ "kind": kind.as_str(), "year": year, "count": n })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_delete_by_year(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // Deleting under a live run would race its flushes.
    if state
        .active_run
        .as_ref()
        .map(|r| !r.is_finished())
        .unwrap_or(false)
    {
        return err(
            &req.id,
            "import_in_progress",
            "an import run is already active",
            None,
        );
    }
    let (kind, year) = match parse_kind_and_year(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut store = SqliteStore::new(conn);
    match store.delete_by_year(kind, year) {
        Ok(n) => ok(
            &req.id,
            json!({ "kind": kind.as_str(), "year": year, "deleted": n }),
        ),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}
