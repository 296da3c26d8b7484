mod analysis;
mod config;
mod db;
mod error;
mod grading;
mod ipc;
mod ledger;
mod logging;
mod notebook;
mod problems;
mod profile;
mod session;
mod speech;

use std::io::{self, BufRead, Write};
use std::sync::mpsc;

fn main() -> anyhow::Result<()> {
    logging::init();

    let (tx, rx) = mpsc::channel();
    let mut state = ipc::AppState::new(tx.clone())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "karikarid started");

    // stdin is read on its own thread so worker results can be answered
    // while the front-end is quiet.
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(v) => v,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            let event = match serde_json::from_str::<ipc::Request>(&line) {
                Ok(req) => ipc::Event::Request(req),
                Err(e) => ipc::Event::Malformed(e.to_string()),
            };
            if tx.send(event).is_err() {
                return;
            }
        }
        let _ = tx.send(ipc::Event::Shutdown);
    });

    let mut stdout = io::stdout();
    for event in rx {
        if matches!(event, ipc::Event::Shutdown) {
            break;
        }
        for resp in ipc::handle_event(&mut state, event) {
            let _ = writeln!(
                stdout,
                "{}",
                serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
            );
        }
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed; exiting");
    Ok(())
}
