mod catalog;
mod db;
mod delim;
mod engine;
mod import;
mod ipc;
mod model;
mod normalize;
mod progress;
mod store;
mod translate;

use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;

fn main() {
    // One writer thread owns stdout; responses from the request loop and
    // progress events from an import worker share it without interleaving.
    let (tx, rx) = mpsc::channel::<String>();
    let writer = thread::spawn(move || {
        let mut out = io::stdout();
        for line in rx {
            if writeln!(out, "{}", line).is_err() {
                break;
            }
            let _ = out.flush();
        }
    });

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        emitter: tx.clone(),
        active_run: None,
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; report and move on.
                let _ = tx.send(format!(
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                ));
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = tx.send(resp.to_string());
    }

    // Let an in-flight import finish its current batch work before exiting.
    if let Some(mut run) = state.active_run.take() {
        if let Some(join) = run.join.take() {
            let _ = join.join();
        }
    }
    drop(state);
    drop(tx);
    let _ = writer.join();
}
