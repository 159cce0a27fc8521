//! Standalone peer binary.
//!
//! Usage:
//!   cargo run -p proto_peer -- --local 127.0.0.1:0 --remote 127.0.0.1:9000 --peer-id 0x1234
//!
//! This is a minimal demonstration front-end around [`proto_peer::PeerEngine`];
//! a real interactive CLI (JSON command parsing, a richer prompt) is out of
//! scope for the core and left to the application.

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use proto_peer::PeerEngine;
use proto_shared::config::{PeerOptions, TransportOptions};
use proto_shared::event::PeerEvent;
use proto_shared::logging::TracingSink;
use proto_shared::wire::{CommandType, SampleUpMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    local: String,
    remote: String,
    peer_id: u16,
    queue_capacity: usize,
}

fn parse_peer_id(s: &str) -> u16 {
    if let Some(hex) = s.strip_prefix("0x") {
        u16::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        s.parse().unwrap_or(0)
    }
}

fn parse_args() -> Args {
    let mut args = Args {
        local: "127.0.0.1:0".to_string(),
        remote: "127.0.0.1:9000".to_string(),
        peer_id: 1,
        queue_capacity: 100,
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
                args.remote = raw[i + 1].clone();
                i += 2;
            }
            "--peer-id" if i + 1 < raw.len() => {
                args.peer_id = parse_peer_id(&raw[i + 1]);
                i += 2;
            }
            "--queue-capacity" if i + 1 < raw.len() => {
                args.queue_capacity = raw[i + 1].parse().unwrap_or(100);
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
        remote: Some(args.remote.parse().context("parse --remote")?),
        send_queue_capacity: args.queue_capacity,
    };
    let peer_options = PeerOptions {
        peer_id: args.peer_id,
        ..Default::default()
    };

    info!(peer_id = %format!("{:#06x}", args.peer_id), local = %transport_options.local, remote = ?transport_options.remote, "starting peer");

    let engine = PeerEngine::new(Arc::new(TracingSink), transport_options, peer_options);
    engine.start().await.context("start peer engine")?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PeerEvent::NegotiationStateChanged {
                    state,
                    peer_id,
                    session_id,
                    miss_count,
                } => {
                    println!(
                        "[negotiation] {state:?} peer={peer_id:#06x} session={session_id} miss={miss_count:?}"
                    );
                }
                PeerEvent::SampleDownReceived(message) => {
                    println!(
                        "[sample-down] status={:?} value={:.4} timestamp={}",
                        message.status, message.value, message.timestamp
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
            print!("peer] ");
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

    println!("Peer ready. Commands: negotiate | sample <value> | status | quit");
    while let Some(line) = line_rx.recv().await {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["negotiate"] => engine.send_negotiation().await,
            ["sample", value] => {
                let value: f64 = value.parse().unwrap_or(0.0);
                let msg = SampleUpMessage {
                    session_id: 0,
                    peer_id: 0,
                    command: CommandType::Update,
                    signed_value: value as i16,
                    sequence: 0,
                    value,
                };
                let sent = engine.send_sample_up(msg, None).await;
                println!("sent={sent}");
            }
            ["status"] => {
                println!(
                    "peer_id={:#06x} session_id={} connected={}",
                    engine.peer_id(),
                    engine.session_id().await,
                    engine.is_connected().await
                );
            }
            ["quit"] | ["exit"] => break,
            _ => println!("unknown command"),
        }
    }

    engine.stop().await;
    Ok(())
}
