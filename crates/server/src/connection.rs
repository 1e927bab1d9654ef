// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection actor. Owns one TCP socket end to end:
//! reads `\n`-delimited [`ClientEnvelope`] frames, gates everything but
//! `auth` behind a configured token, processes commands strictly in
//! receipt order, and fans out `stream.event` frames from subscriptions
//! and PTY attachments this connection opened. One `tokio::select!` merges
//! inbound socket reads with outbound event delivery; each subscription
//! and PTY attachment this connection opens runs as its own independently
//! cancellable task so a slow one never stalls the others.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use harness_broker::BrokerEvent;
use harness_core::envelope::{ClientEnvelope, Command, ObservedEvent, ServerEnvelope};
use harness_core::ids::{AttachmentId, SessionId, SubscriptionId};
use harness_core::json::CanonicalJson;
use harness_core::{HarnessError, PublishedEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::router::{self, Context};

/// A subscription opened by `stream.subscribe`, or the synthetic one
/// backing `pty.subscribe-events` (same machinery, keyed by the session
/// id instead of a generated subscription id so `pty.unsubscribe-events`
/// can find it again without the client having to remember an id).
struct OpenSubscription {
    cancel: CancellationToken,
}

/// A PTY attachment opened by `pty.attach`, delivering raw output
/// chunks rather than bus events.
struct OpenAttachment {
    session_id: SessionId,
    cancel: CancellationToken,
}

/// Runs one client connection to completion. Never returns an error —
/// any I/O failure or protocol violation simply ends the connection.
pub async fn handle(socket: TcpStream, ctx: Arc<Context>) {
    let peer = socket.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let (deliver_tx, mut deliver_rx) = mpsc::unbounded_channel::<ServerEnvelope>();
    let mut authenticated = ctx.config.auth_token.is_none();

    let mut subscriptions: HashMap<SubscriptionId, OpenSubscription> = HashMap::new();
    let mut event_subscriptions: HashMap<SessionId, OpenSubscription> = HashMap::new();
    let mut attachments: HashMap<AttachmentId, OpenAttachment> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            outgoing = deliver_rx.recv() => {
                let Some(envelope) = outgoing else { break };
                if send_envelope(&mut write_half, &envelope).await.is_err() {
                    break;
                }
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(%peer, %err, "connection read error");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let envelope: ClientEnvelope = match serde_json::from_str(&line) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        let _ = send_envelope(
                            &mut write_half,
                            &ServerEnvelope::AuthError { error: format!("malformed frame: {err}") },
                        )
                        .await;
                        continue;
                    }
                };

                if !authenticated {
                    match envelope {
                        ClientEnvelope::Auth { token } => {
                            if harness_core_auth_ok(&ctx, &token) {
                                authenticated = true;
                                if send_envelope(&mut write_half, &ServerEnvelope::AuthOk {}).await.is_err() {
                                    break;
                                }
                            } else {
                                let _ = send_envelope(
                                    &mut write_half,
                                    &ServerEnvelope::AuthError { error: "invalid token".to_string() },
                                )
                                .await;
                                break;
                            }
                        }
                        _ => {
                            let _ = send_envelope(
                                &mut write_half,
                                &ServerEnvelope::AuthError { error: "authentication required".to_string() },
                            )
                            .await;
                            break;
                        }
                    }
                    continue;
                }

                match envelope {
                    ClientEnvelope::Auth { .. } => {
                        // Already authenticated; a repeat `auth` is harmless, just re-ack.
                        if send_envelope(&mut write_half, &ServerEnvelope::AuthOk {}).await.is_err() {
                            break;
                        }
                    }
                    ClientEnvelope::PtyInput { session_id, data_base64 } => {
                        if let Ok(data) = BASE64.decode(data_base64.as_bytes()) {
                            let _ = ctx.coordinator.write_input(session_id, Bytes::from(data)).await;
                        }
                    }
                    ClientEnvelope::PtyResize { session_id, cols, rows } => {
                        let _ = ctx.coordinator.resize(session_id, cols, rows).await;
                    }
                    ClientEnvelope::PtySignal { session_id, signal } => {
                        let _ = ctx.coordinator.signal(session_id, signal).await;
                    }
                    ClientEnvelope::Command { command_id, command } => {
                        if send_envelope(&mut write_half, &ServerEnvelope::CommandAccepted { command_id: command_id.clone() })
                            .await
                            .is_err()
                        {
                            break;
                        }
                        let outcome = handle_command(
                            &ctx,
                            command,
                            &deliver_tx,
                            &mut subscriptions,
                            &mut event_subscriptions,
                            &mut attachments,
                        )
                        .await;
                        let reply = match outcome {
                            Ok(result) => ServerEnvelope::CommandCompleted { command_id, result },
                            Err(err) => ServerEnvelope::CommandFailed { command_id, error: err.message },
                        };
                        if send_envelope(&mut write_half, &reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    for (_, sub) in subscriptions.drain() {
        sub.cancel.cancel();
    }
    for (_, sub) in event_subscriptions.drain() {
        sub.cancel.cancel();
    }
    for (_, attachment) in attachments.drain() {
        attachment.cancel.cancel();
    }
}

fn harness_core_auth_ok(ctx: &Context, presented: &str) -> bool {
    crate::auth::token_matches(presented, ctx.config.auth_token.as_deref())
}

/// Dispatches one `command` envelope. Connection-owned command types
/// (subscriptions and attachments) are handled here; everything else is
/// delegated to [`router::dispatch`].
async fn handle_command(
    ctx: &Arc<Context>,
    command: Command,
    deliver_tx: &mpsc::UnboundedSender<ServerEnvelope>,
    subscriptions: &mut HashMap<SubscriptionId, OpenSubscription>,
    event_subscriptions: &mut HashMap<SessionId, OpenSubscription>,
    attachments: &mut HashMap<AttachmentId, OpenAttachment>,
) -> Result<CanonicalJson, HarnessError> {
    match command {
        Command::StreamSubscribe { filters, include_output, after_cursor } => {
            let subscription_id = SubscriptionId::new();
            let cancel = CancellationToken::new();
            let (bus_tx, mut bus_rx) = mpsc::unbounded_channel::<(SubscriptionId, PublishedEvent)>();
            crate::subscription::spawn(
                subscription_id,
                Arc::clone(&ctx.bus),
                filters,
                include_output,
                after_cursor,
                ctx.config.subscription_queue_capacity,
                cancel.clone(),
                bus_tx,
            );
            let forward = deliver_tx.clone();
            tokio::spawn(async move {
                while let Some((id, published)) = bus_rx.recv().await {
                    let envelope = ServerEnvelope::StreamEvent { subscription_id: id, cursor: published.cursor, event: published.event };
                    if forward.send(envelope).is_err() {
                        break;
                    }
                }
            });
            subscriptions.insert(subscription_id, OpenSubscription { cancel });
            Ok(CanonicalJson(serde_json::json!({ "subscriptionId": subscription_id })))
        }
        Command::StreamUnsubscribe { subscription_id } => {
            if let Some(sub) = subscriptions.remove(&subscription_id) {
                sub.cancel.cancel();
            }
            Ok(CanonicalJson(serde_json::json!({})))
        }
        Command::PtySubscribeEvents { session_id } => {
            let subscription_id = SubscriptionId(session_id.0);
            let cancel = CancellationToken::new();
            let (bus_tx, mut bus_rx) = mpsc::unbounded_channel::<(SubscriptionId, PublishedEvent)>();
            let filters = CanonicalJson(serde_json::json!({ "sessionId": session_id }));
            crate::subscription::spawn(
                subscription_id,
                Arc::clone(&ctx.bus),
                filters,
                false,
                None,
                ctx.config.subscription_queue_capacity,
                cancel.clone(),
                bus_tx,
            );
            let forward = deliver_tx.clone();
            tokio::spawn(async move {
                while let Some((id, published)) = bus_rx.recv().await {
                    let envelope = ServerEnvelope::StreamEvent { subscription_id: id, cursor: published.cursor, event: published.event };
                    if forward.send(envelope).is_err() {
                        break;
                    }
                }
            });
            event_subscriptions.insert(session_id, OpenSubscription { cancel });
            Ok(CanonicalJson(serde_json::json!({})))
        }
        Command::PtyUnsubscribeEvents { session_id } => {
            if let Some(sub) = event_subscriptions.remove(&session_id) {
                sub.cancel.cancel();
            }
            Ok(CanonicalJson(serde_json::json!({})))
        }
        Command::PtyAttach { session_id, since_cursor, include_output } => {
            let (attachment_id, mut rx) = ctx.coordinator.attach_output(session_id, since_cursor).await?;
            let cancel = CancellationToken::new();
            let subscription_id = SubscriptionId(attachment_id.0);
            let forward = deliver_tx.clone();
            let child_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut last_cursor = since_cursor;
                loop {
                    tokio::select! {
                        biased;
                        _ = child_cancel.cancelled() => break,
                        event = rx.recv() => {
                            let Some(event) = event else { break };
                            let observed = match event {
                                BrokerEvent::Data { cursor, chunk } => {
                                    last_cursor = cursor;
                                    if !include_output {
                                        continue;
                                    }
                                    ObservedEvent::SessionOutput { session_id, chunk_base64: BASE64.encode(chunk) }
                                }
                                BrokerEvent::Exit(exit_record) => {
                                    ObservedEvent::SessionEvent { session_id, kind: "exit".to_string(), exit_record: Some(exit_record) }
                                }
                            };
                            let envelope = ServerEnvelope::StreamEvent { subscription_id, cursor: last_cursor, event: observed };
                            if forward.send(envelope).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
            attachments.insert(attachment_id, OpenAttachment { session_id, cancel });
            Ok(CanonicalJson(serde_json::json!({ "attachmentId": attachment_id })))
        }
        Command::PtyDetach { attachment_id } => {
            if let Some(attachment) = attachments.remove(&attachment_id) {
                attachment.cancel.cancel();
                ctx.coordinator.detach_output(attachment.session_id, attachment_id).await;
            }
            Ok(CanonicalJson(serde_json::json!({})))
        }
        other => router::dispatch(ctx, other).await,
    }
}

async fn send_envelope(write_half: &mut tokio::net::tcp::OwnedWriteHalf, envelope: &ServerEnvelope) -> std::io::Result<()> {
    let mut line = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    write_half.write_all(line.as_bytes()).await
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
