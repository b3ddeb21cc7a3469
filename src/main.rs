//! Line-oriented argument graph service.
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout (see [`arggraph::protocol`]). Requests are handled in
//! arrival order; revision waits run in the background so they do not hold
//! up later requests. Logs go to stderr and `$LOG_DIR`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use arggraph::config::Config;
use arggraph::logging::{log, obj, v_str, Domain, Level};
use arggraph::protocol::{handle, parse_line, Response};
use arggraph::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("max_nodes_per_issue", json!(cfg.limits.max_total_nodes_per_issue)),
        ]),
    );
    let engine = Arc::new(Engine::open(&cfg)?);

    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(resp) = rx.recv().await {
            let mut line = serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string());
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match parse_line(&line) {
            Ok(env) => env,
            Err(resp) => {
                let _ = tx.send(resp);
                continue;
            }
        };
        let id = envelope.id;
        let request = envelope.request;
        if request.is_blocking() {
            let engine = Arc::clone(&engine);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut resp = handle(&engine, request).await;
                resp.id = id;
                let _ = tx.send(resp);
            });
        } else {
            let mut resp = handle(&engine, request).await;
            resp.id = id;
            let _ = tx.send(resp);
        }
    }

    if let Err(err) = engine.checkpoint().await {
        log(Level::Error, Domain::System, "checkpoint_failed", obj(&[("error", v_str(&err.to_string()))]));
    }
    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    drop(tx);
    // outstanding revision waits may never finish once input is closed
    let _ = tokio::time::timeout(Duration::from_millis(250), writer).await;
    Ok(())
}
