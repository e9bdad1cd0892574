//! Per-connection read/write pumps.
//!
//! Each upgraded socket runs two tasks for its lifetime. The reader turns
//! inbound frames into [`Message`]s and feeds the group; the writer drains
//! the connection's private outbound queue back to the socket and owns
//! keepalive pings. The two are coupled only through that bounded queue and
//! its close signal: when the group unregisters a member it drops the
//! producing half, and the writer flushes what is buffered, emits a close
//! frame, and exits.

use crate::config::HeartbeatConfig;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::{group::next_connection_id, BroadcastGroup, Member, Message, Outbound, MAX_CONTENT_BYTES};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Drive one authorized connection until either pump terminates.
///
/// Registers with `group`, runs reader and writer concurrently, and
/// guarantees unregistration on every exit path. Unregister is idempotent,
/// so racing exits are harmless.
pub async fn serve(socket: WebSocket, group: BroadcastGroup, identity: String, heartbeat: HeartbeatConfig) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let conn_id = next_connection_id();
    let (member, outbound) = Member::new(conn_id);
    group.register(member);

    debug!(connection = conn_id, channel = group.channel_id(), sender = %identity, "connection active");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, outbound, heartbeat));
    let mut reader = tokio::spawn(read_pump(stream, group.clone(), identity, heartbeat));

    tokio::select! {
        _ = &mut reader => {
            // The inbound side ended: unregister closes the outbound queue,
            // letting the writer flush, send its close frame, and finish.
            group.unregister(conn_id);
            let _ = writer.await;
        }
        _ = &mut writer => {
            // A write failed or timed out; the transport is unusable.
            reader.abort();
            group.unregister(conn_id);
        }
    }

    debug!(connection = conn_id, channel = group.channel_id(), "connection closed");
}

/// Inbound pump: frames become broadcasts.
///
/// Runs under a rolling deadline of one pong window, refreshed only when the
/// peer answers a keepalive. Returning (for any reason) is the sole inbound
/// path that ends the connection's life.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    group: BroadcastGroup,
    identity: String,
    heartbeat: HeartbeatConfig,
) {
    let mut deadline = Instant::now() + heartbeat.pong_timeout();

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                debug!(sender = %identity, "read deadline expired");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!(sender = %identity, error = %e, "read error");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => {
                if text.len() > MAX_CONTENT_BYTES {
                    warn!(sender = %identity, bytes = text.len(), "inbound frame over limit");
                    return;
                }
                metrics::record_message(text.len());
                group.broadcast(Message::new(&identity, text));
            }
            WsMessage::Binary(payload) => {
                if payload.len() > MAX_CONTENT_BYTES {
                    warn!(sender = %identity, bytes = payload.len(), "inbound frame over limit");
                    return;
                }
                metrics::record_message(payload.len());
                let content = String::from_utf8_lossy(&payload).into_owned();
                group.broadcast(Message::new(&identity, content));
            }
            WsMessage::Pong(_) => {
                deadline = Instant::now() + heartbeat.pong_timeout();
            }
            WsMessage::Ping(_) => {
                // axum answers pings on our behalf.
            }
            WsMessage::Close(_) => return,
        }
    }
}

/// Outbound pump: queue drain plus idle keepalive.
async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: Outbound,
    heartbeat: HeartbeatConfig,
) {
    let mut ping = interval_at(Instant::now() + heartbeat.ping_interval(), heartbeat.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            delivery = outbound.recv() => match delivery {
                Some(msg) => {
                    let encoded = match msg.to_json() {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!(error = %e, "failed to encode message, skipping");
                            continue;
                        }
                    };
                    if send_deadline(&mut sink, WsMessage::Text(encoded), heartbeat).await.is_err() {
                        return;
                    }
                }
                None => {
                    // Queue closed by the group (buffered messages already
                    // drained above). Tell the peer we are done.
                    let _ = send_deadline(
                        &mut sink,
                        WsMessage::Close(None::<CloseFrame<'static>>),
                        heartbeat,
                    )
                    .await;
                    return;
                }
            },
            _ = ping.tick() => {
                if send_deadline(&mut sink, WsMessage::Ping(Vec::new()), heartbeat).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_deadline(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
    heartbeat: HeartbeatConfig,
) -> Result<(), ()> {
    match timeout(heartbeat.write_timeout(), sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "write error");
            Err(())
        }
        Err(_) => {
            debug!("write deadline expired");
            Err(())
        }
    }
}
