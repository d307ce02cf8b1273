//! `ClientSession`: the state machine driving one WebSocket ↔ one PTY.
//!
//! This owns the handshake, the authentication gate, the PTY spawn, and the
//! bidirectional relay loop. The producer/consumer handoff between the PTY
//! reader and the WebSocket writer is a capacity-1 `tokio::sync::mpsc`
//! channel rather than a hand-rolled mutex/condvar pair (see Design Notes
//! §9 in the spec this crate implements): the channel's backpressure when
//! the slot is full reproduces the "one chunk in flight" stall exactly.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::frame::{
    auth_token_of, decode_client_frame, output_frame, set_preferences_frame,
    set_reconnect_frame, set_window_title_frame, ClientFrame,
};
use crate::pty::PtyProcess;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownState;

/// Caps the size of a single inbound message the session will assemble
/// before giving up and closing. Resolves the open question in the
/// distilled spec about unbounded `rx` growth from a client that never
/// completes a message.
const MAX_RX_BYTES: usize = 64 * 1024;

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_UNEXPECTED_CONDITION: u16 = 1011;

/// Message handed from the PTY's dedicated blocking reader task to the
/// WebSocket writer task over the capacity-1 handoff channel.
enum PtyEvent {
    Data(Vec<u8>),
    Eof,
    Error(String),
}

/// Everything a session needs to run, bundled by the pre-upgrade filter in
/// `server::ws` once admission has already succeeded.
pub struct SessionContext {
    pub registry_id: u64,
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: ShutdownState,
    pub peer_hostname: String,
}

/// Drive one admitted session to completion. Always removes the session
/// from the registry exactly once, however it ends.
pub async fn run(socket: WebSocket, ctx: SessionContext) {
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = run_handshake(&mut sender, &ctx).await {
        log::warn!("handshake write failed: {e}");
        close_with(&mut sender, CLOSE_UNEXPECTED_CONDITION, "unexpected condition").await;
        teardown(&ctx, None).await;
        return;
    }

    let authenticated = match await_auth(&mut receiver, &mut sender, &ctx).await {
        AuthOutcome::Authenticated => true,
        AuthOutcome::Rejected => {
            close_with(&mut sender, CLOSE_POLICY_VIOLATION, "policy violation").await;
            teardown(&ctx, None).await;
            return;
        }
        AuthOutcome::ClientGone => {
            teardown(&ctx, None).await;
            return;
        }
    };
    debug_assert!(authenticated);

    let (pty, reader) = match PtyProcess::spawn(&ctx.config.argv, DEFAULT_COLS, DEFAULT_ROWS, None)
    {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("failed to spawn pty: {e}");
            close_with(&mut sender, CLOSE_UNEXPECTED_CONDITION, "unexpected condition").await;
            teardown(&ctx, None).await;
            return;
        }
    };
    let pty = Arc::new(pty);

    let (pty_tx, mut pty_rx) = mpsc::channel::<PtyEvent>(1);
    spawn_pty_reader(reader, pty_tx);

    let outcome = relay(&mut sender, &mut receiver, &mut pty_rx, &pty, &ctx).await;
    let (close_code, reason) = match outcome {
        RelayOutcome::ClientClosed | RelayOutcome::PtyEof => (CLOSE_NORMAL, "normal closure"),
        RelayOutcome::Error => (CLOSE_UNEXPECTED_CONDITION, "unexpected condition"),
    };
    close_with(&mut sender, close_code, reason).await;
    teardown(&ctx, Some(&pty)).await;
}

async fn run_handshake(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    ctx: &SessionContext,
) -> Result<(), axum::Error> {
    let argv0 = ctx.config.argv[0].as_str();
    sender
        .send(Message::Binary(set_window_title_frame(
            argv0,
            &ctx.peer_hostname,
        )))
        .await?;
    sender
        .send(Message::Binary(set_reconnect_frame(ctx.config.reconnect)))
        .await?;
    sender
        .send(Message::Binary(set_preferences_frame(
            &ctx.config.prefs_json,
        )))
        .await?;
    Ok(())
}

enum AuthOutcome {
    Authenticated,
    Rejected,
    ClientGone,
}

/// Wait for the client's first `JSON_DATA` frame. Any other command
/// received before authentication is silently ignored rather than treated
/// as an error (§4.3: "A receive while unauthenticated of any command
/// other than JSON_DATA causes the WS layer to reject the frame").
async fn await_auth(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    ctx: &SessionContext,
) -> AuthOutcome {
    loop {
        let msg = match receiver.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                log::warn!("websocket error awaiting auth: {e}");
                return AuthOutcome::ClientGone;
            }
            None => return AuthOutcome::ClientGone,
        };

        let data = match msg {
            Message::Binary(data) => data,
            Message::Close(_) => return AuthOutcome::ClientGone,
            Message::Ping(payload) => {
                let _ = sender.send(Message::Pong(payload)).await;
                continue;
            }
            _ => continue,
        };

        if data.len() > MAX_RX_BYTES {
            log::warn!("pre-auth message exceeded {MAX_RX_BYTES} bytes, closing");
            return AuthOutcome::Rejected;
        }

        match decode_client_frame(&data) {
            ClientFrame::JsonData(payload) => {
                return match &ctx.config.credential {
                    Some(expected) => match auth_token_of(&payload) {
                        Some(token) if token == expected => AuthOutcome::Authenticated,
                        _ => AuthOutcome::Rejected,
                    },
                    None => AuthOutcome::Authenticated,
                };
            }
            _ => continue,
        }
    }
}

enum RelayOutcome {
    ClientClosed,
    PtyEof,
    Error,
}

async fn relay(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    pty_rx: &mut mpsc::Receiver<PtyEvent>,
    pty: &Arc<PtyProcess>,
    ctx: &SessionContext,
) -> RelayOutcome {
    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > MAX_RX_BYTES {
                            log::warn!("inbound message exceeded {MAX_RX_BYTES} bytes, closing");
                            return RelayOutcome::Error;
                        }
                        match decode_client_frame(&data) {
                            ClientFrame::Input(bytes) => {
                                if ctx.config.readonly {
                                    continue;
                                }
                                let pty = Arc::clone(pty);
                                let write_result = tokio::task::spawn_blocking(move || pty.write(&bytes))
                                    .await
                                    .unwrap_or_else(|e| {
                                        log::error!("pty write task panicked: {e}");
                                        Ok(())
                                    });
                                if let Err(e) = write_result {
                                    log::warn!("pty write failed: {e}");
                                    return RelayOutcome::Error;
                                }
                            }
                            ClientFrame::Resize { columns, rows } => {
                                let pty = Arc::clone(pty);
                                let resize_result =
                                    tokio::task::spawn_blocking(move || pty.set_winsize(columns, rows))
                                        .await
                                        .unwrap_or_else(|e| {
                                            log::error!("pty resize task panicked: {e}");
                                            Ok(())
                                        });
                                if let Err(e) = resize_result {
                                    log::warn!("pty resize failed: {e}");
                                }
                            }
                            ClientFrame::JsonData(_) => {
                                // A second auth frame after the child exists
                                // is a no-op per §4.3.
                            }
                            ClientFrame::Unknown => {
                                log::debug!("ignoring unrecognized or malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sender.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return RelayOutcome::ClientClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("websocket error: {e}");
                        return RelayOutcome::Error;
                    }
                }
            }
            event = pty_rx.recv() => {
                match event {
                    Some(PtyEvent::Data(bytes)) => {
                        if sender.send(Message::Binary(output_frame(&bytes))).await.is_err() {
                            return RelayOutcome::Error;
                        }
                    }
                    Some(PtyEvent::Eof) => return RelayOutcome::PtyEof,
                    Some(PtyEvent::Error(e)) => {
                        log::warn!("pty read error: {e}");
                        return RelayOutcome::Error;
                    }
                    None => return RelayOutcome::PtyEof,
                }
            }
        }
    }
}

/// Spawn the session's dedicated PTY worker: a blocking read loop feeding
/// the capacity-1 handoff channel. The channel's `send` blocks when the
/// previous chunk hasn't been drained yet, which is the backpressure
/// mechanism described in §4.3 and §5.
fn spawn_pty_reader(mut reader: Box<dyn std::io::Read + Send>, tx: mpsc::Sender<PtyEvent>) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.blocking_send(PtyEvent::Eof);
                    return;
                }
                Ok(n) => {
                    if tx.blocking_send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(PtyEvent::Error(e.to_string()));
                    return;
                }
            }
        }
    });
}

async fn close_with(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &'static str,
) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Terminate the child (if any), reap it, and remove the session from the
/// registry. If this was a `once`-mode run and no sessions remain, request
/// process shutdown.
async fn teardown(ctx: &SessionContext, pty: Option<&Arc<PtyProcess>>) {
    if let Some(pty) = pty {
        let pid = pty.pid();
        let pty = Arc::clone(pty);
        let sig_code = ctx.config.sig_code;
        let grace = ctx.config.kill_grace;
        let outcome = tokio::task::spawn_blocking(move || pty.terminate_and_wait(sig_code, grace))
            .await
            .unwrap_or_else(|e| {
                log::error!("teardown task for pid {pid} panicked: {e}");
                Ok(crate::pty::ExitOutcome::Unknown)
            });
        match outcome {
            Ok(crate::pty::ExitOutcome::Exited(code)) => {
                log::info!("child {pid} exited with status {code}");
            }
            Ok(crate::pty::ExitOutcome::Signaled(sig)) => {
                log::info!("child {pid} terminated by signal {sig}");
            }
            Ok(crate::pty::ExitOutcome::Unknown) => {
                log::info!("child {pid} already reaped");
            }
            Err(e) => log::warn!("failed to reap child {pid}: {e}"),
        }
    }

    let remaining = ctx.registry.remove(ctx.registry_id).await;
    if ctx.config.once && remaining == 0 {
        log::info!("once mode: last session closed, requesting shutdown");
        ctx.shutdown.request_shutdown();
    }
}
