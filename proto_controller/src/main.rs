//! Standalone controller binary.
//!
//! Usage:
//!   cargo run -p proto_controller -- --local 127.0.0.1:9000
//!
//! This is a minimal demonstration front-end around
//! [`proto_controller::ControllerEngine`]; a real interactive CLI is out of
//! scope for the core and left to the application.

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use proto_controller::ControllerEngine;
use proto_shared::config::{ControllerOptions, TransportOptions};
use proto_shared::event::ControllerEvent;
use proto_shared::logging::TracingSink;
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    local: String,
    remote: Option<String>,
    queue_capacity: usize,
    peer_timeout_secs: f64,
}

fn parse_args() -> Args {
    let mut args = Args {
        local: "127.0.0.1:9000".to_string(),
        remote: None,
        queue_capacity: 100,
        peer_timeout_secs: 180.0,
    };
    let raw: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < raw.len() {
        match raw[i].as_str() {
            "--local" if i + 1 < raw.len() => {
                args.local = raw[i + 1].clone();
                i += 2;
            }
            "--remote" if i + 1 < raw.len() => {
                args.remote = Some(raw[i + 1].clone());
                i += 2;
            }
            "--queue-capacity" if i + 1 < raw.len() => {
                args.queue_capacity = raw[i + 1].parse().unwrap_or(100);
                i += 2;
            }
            "--peer-timeout" if i + 1 < raw.len() => {
                args.peer_timeout_secs = raw[i + 1].parse().unwrap_or(180.0);
                i += 2;
            }
            _ => i += 1,
        }
    }
    args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let transport_options = TransportOptions {
        local: args.local.parse().context("parse --local")?,
        remote: args
            .remote
            .as_deref()
            .map(|s| s.parse())
            .transpose()
            .context("parse --remote")?,
        send_queue_capacity: args.queue_capacity,
    };
    let controller_options = ControllerOptions {
        peer_timeout_secs: args.peer_timeout_secs,
    };

    info!(local = %transport_options.local, "starting controller");

    let engine = ControllerEngine::new(Arc::new(TracingSink), transport_options, controller_options);
    engine.start().await.context("start controller engine")?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ControllerEvent::PeerStateChanged {
                    state,
                    peer_id,
                    session_id,
                    remote_endpoint,
                } => {
                    println!(
                        "[peer] {state:?} peer={peer_id:#06x} session={session_id} addr={remote_endpoint}"
                    );
                }
                ControllerEvent::SampleUpReceived {
                    message,
                    remote_endpoint,
                } => {
                    println!(
                        "[sample-up] from={remote_endpoint} command={:?} value={:.4}",
                        message.command, message.value
                    );
                }
            }
        }
    });

    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("controller] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Controller ready. Commands: status | quit");
    while let Some(line) = line_rx.recv().await {
        match line.as_str() {
            "status" => println!("peers tracked: {}", engine.peer_count().await),
            "quit" | "exit" => break,
            _ => println!("unknown command"),
        }
    }

    engine.stop().await;
    Ok(())
}
