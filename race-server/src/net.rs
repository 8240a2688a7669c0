use std::sync::Arc;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::state::{ClientCommand, ClientMessage, ServerMessage, SharedGameState};

pub async fn start_websocket_server(
    state: Arc<Mutex<SharedGameState>>,
    port: u16,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind WebSocket port {port}"))?;

    info!("🌐 WebSocket listening on ws://localhost:{port}");

    loop {
        let (raw, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("⚠️ accept failed: {e}");
                continue;
            }
        };
        let state_clone = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_client(raw, state_clone).await {
                warn!("⚠️ client {addr}: {e:#}");
            }
        });
    }
}

async fn handle_client(raw: TcpStream, state: Arc<Mutex<SharedGameState>>) -> anyhow::Result<()> {
    let ws = accept_async(raw).await.context("WebSocket handshake failed")?;
    let (mut write, mut read) = ws.split();

    // -------------------------------
    // 1) Create outgoing message channel
    // -------------------------------
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // -------------------------------
    // 2) Spawn send-loop task
    // -------------------------------
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // -------------------------------
    // 3) Register + take a seat if one is free
    // -------------------------------
    let client_id = Uuid::new_v4().to_string();
    let vehicle = {
        let mut game = state.lock().await;
        let vehicle = game.register_client(&client_id, tx.clone());
        game.send_to(&client_id, &ServerMessage::Welcome { client_id: &client_id, vehicle });
        vehicle
    };

    match vehicle {
        Some(v) => info!("🟢 Player connected: {client_id} driving {v}"),
        None => info!("🟢 Spectator connected: {client_id}"),
    }

    // -------------------------------
    // 4) Main receive loop
    // -------------------------------
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };

        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let parsed = match serde_json::from_str::<ClientMessage>(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("⚠️ {client_id} sent something unreadable: {e}");
                continue;
            }
        };

        let command = match parsed {
            ClientMessage::Ping => {
                if let Some(json) = ServerMessage::Pong.to_json() {
                    let _ = tx.send(json);
                }
                continue;
            }
            ClientMessage::Input(input) => ClientCommand::Input(input),
            ClientMessage::Reset => ClientCommand::Reset,
            ClientMessage::Mute { muted } => ClientCommand::Mute(muted),
            ClientMessage::Engine { stopped } => ClientCommand::StopEngine(stopped),
        };

        state.lock().await.queue(&client_id, command);
    }

    info!("🔴 Client disconnected: {client_id}");
    state.lock().await.remove_client(&client_id);
    Ok(())
}
