use serde_json::json;

use crate::catalog::{self, Catalogs};
use crate::ipc::error::{bad_params, err, ok};
use crate::ipc::types::{AppState, Request};

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.load" => Some(handle_load(state, req)),
        "catalog.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}

fn handle_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // The active run resolves against the snapshot it started with; swapping
    // catalogs underneath it would make resolution stale.
    if state
        .active_run
        .as_ref()
        .map(|r| !r.is_finished())
        .unwrap_or(false)
    {
        return err(
            &req.id,
            "import_in_progress",
            "catalog snapshot is owned by the active import run",
            None,
        );
    }

    let catalogs: Catalogs = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => {
            return bad_params(&req.id, format!("invalid catalog payload: {}", e))
        }
    };

    match catalog::replace_in_db(conn, &catalogs) {
        Ok(()) => ok(
            &req.id,
            json!({
                "courses": catalogs.courses.len(),
                "sections": catalogs.sections.len(),
                "people": catalogs.people.len(),
                "enrollments": catalogs.enrollments.len(),
            }),
        ),
        Err(e) => err(&req.id, "catalog_load_failed", e.to_string(), None),
    }
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut counts = serde_json::Map::new();
    for (key, table) in [
        ("courses", "courses"),
        ("sections", "sections"),
        ("people", "people"),
        ("enrollments", "enrollments"),
    ] {
        let n: Result<i64, _> = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |r| r.get(0),
        );
        match n {
            Ok(n) => {
                counts.insert(key.to_string(), json!(n));
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(&req.id, serde_json::Value::Object(counts))
}
