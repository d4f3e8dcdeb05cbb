mod alloc;
mod config;
mod db;
mod ipc;
mod register;
mod store;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(cfg: &config::Config) {
    // stdout carries the protocol; logs go to stderr only.
    let filter = EnvFilter::try_new(&cfg.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    init_logging(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "enrolld starting");

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = cfg.workspace.as_ref() {
        match db::open_db(path) {
            Ok(conn) => {
                info!(workspace = %path.display(), "workspace opened from environment");
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            // Not fatal: the front end can still send workspace.select.
            Err(e) => warn!(workspace = %path.display(), error = %e, "workspace open failed"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // Can't reply with an id we failed to read.
                warn!(error = %e, "bad request line");
                ipc::err("", "bad_json", e.to_string(), None)
            }
        };

        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }

    info!("stdin closed; exiting");
    Ok(())
}
