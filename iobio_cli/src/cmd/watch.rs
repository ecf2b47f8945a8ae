use std::fmt::Write as _;

use anyhow::{Result, bail};
use iobio_core::Value;
use iobio_rpc::Client;
use iobio_sync::{SessionEnd, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub async fn run_watch(client: &Client, window: u32) -> Result<()> {
    let session = client.start_reinstate(window).await?;
    let mirror = session.mirror();
    let mut events = session.subscribe();
    info!("reinstate session started with window {window}");

    let end = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down.");
                break session.stop().await;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Updated { seq }) => {
                    println!("--- update {seq} ---");
                    print!("{}", render_tree(&mirror.snapshot()));
                }
                Ok(SessionEvent::Ended(end)) => break end,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("skipped {skipped} session events");
                    print!("{}", render_tree(&mirror.snapshot()));
                }
                Err(RecvError::Closed) => break session.closed().await,
            }
        }
    };

    match end {
        SessionEnd::Failed(err) => bail!("reinstate session failed: {err}"),
        SessionEnd::FeedClosed => {
            info!("server closed the reinstate feed");
            Ok(())
        }
        SessionEnd::Stopped => Ok(()),
    }
}

/// Renders a mirrored tree as an indented listing, two spaces per level.
pub fn render_tree(value: &Value) -> String {
    let mut out = String::new();
    render_into(&mut out, value, 0);
    out
}

fn render_into(out: &mut String, value: &Value, depth: usize) {
    let Value::Map(entries) = value else {
        let _ = writeln!(out, "{:indent$}{value}", "", indent = depth * 2);
        return;
    };
    for (key, child) in entries {
        match child {
            Value::Map(_) => {
                let _ = writeln!(out, "{:indent$}{key}/", "", indent = depth * 2);
                render_into(out, child, depth + 1);
            }
            leaf => {
                let _ = writeln!(out, "{:indent$}{key}: {leaf}", "", indent = depth * 2);
            }
        }
    }
}
