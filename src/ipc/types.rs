use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use rusqlite::Connection;
use serde::Deserialize;

use crate::model::{ImportRunState, ImportSummary};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Handle to the one import run a daemon may have in flight. The worker
/// thread owns the pipeline; the request loop only reads counters, sets the
/// cancel flag, and eventually collects the summary.
pub struct RunHandle {
    pub run_id: String,
    pub state: Arc<Mutex<ImportRunState>>,
    pub summary: Arc<Mutex<Option<ImportSummary>>>,
    pub cancel: Arc<AtomicBool>,
    /// Set by the worker before it emits its terminal event, so a caller who
    /// saw `import.done` never races the thread teardown.
    pub finished: Arc<AtomicBool>,
    pub join: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
            || self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Lines handed to the stdout writer thread: responses and events alike.
    pub emitter: Sender<String>,
    pub active_run: Option<RunHandle>,
}

/// A poisoned lock here only means the worker panicked mid-update; the
/// counters are still the best available snapshot.
pub fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
