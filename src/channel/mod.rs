// Live channel: one WebSocket per (session, active room), or one
// session-scoped background connection. Translates connection lifecycle and
// inbound frames into controller events over an mpsc queue; outbound sends
// are fire-and-forget.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use url::Url;

use crate::error::ChannelError;
use crate::models::Message;

pub mod wire;
use wire::{ClientEvent, ServerEvent};

/// Which connection an event came from. Room channels carry the generation
/// of the room entry that opened them, so events from a superseded channel
/// can be discarded on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScope {
    Room(u64),
    Session,
}

/// Inbound channel lifecycle and payload events, in arrival order.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Message(Message),
    Presence(Vec<String>),
    TypingStarted(String),
    TypingStopped(String),
}

/// Handle to one open connection. Must be closed before a new one is opened
/// for a different room or on logout; the controller owns that invariant.
pub struct LiveChannel {
    scope: ChannelScope,
    room: Option<String>,
    username: String,
    out_tx: mpsc::UnboundedSender<ClientEvent>,
    reader: JoinHandle<()>,
}

impl LiveChannel {
    /// Connect and start the reader/writer tasks. The credential travels as
    /// a query parameter at connect time, not per-message. For room-scoped
    /// connections a `join_room` event is queued before anything else.
    pub async fn open(
        ws_url: &str,
        token: &str,
        username: &str,
        room: Option<&str>,
        scope: ChannelScope,
        events: mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
    ) -> Result<LiveChannel, ChannelError> {
        let mut url = Url::parse(ws_url)?;
        url.query_pairs_mut().append_pair("token", token);

        let (stream, _) = connect_async(url.as_str()).await?;
        match room {
            Some(room) => info!("live channel open for room {}", room),
            None => info!("session-scoped live channel open"),
        }

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();

        if let Some(room) = room {
            let _ = out_tx.send(ClientEvent::JoinRoom {
                room: room.to_string(),
            });
        }
        let _ = events.send((scope, ChannelEvent::Connected));

        // Writer: drains the outbound queue. A send that fails is dropped
        // silently; the connection has no acknowledgement or retry.
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("failed to encode outbound event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                    debug!("dropped in-flight send on dead connection: {}", e);
                    return;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });

        let fallback_room = room.map(str::to_string);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(raw)) => match serde_json::from_str::<ServerEvent>(&raw) {
                        Ok(event) => {
                            let mapped = map_event(event, fallback_room.as_deref());
                            if events.send((scope, mapped)).is_err() {
                                return;
                            }
                        }
                        Err(_) => debug!("ignored unrecognized frame: {}", raw),
                    },
                    Ok(WsMessage::Close(close)) => {
                        let reason = close.map(|f| f.reason.to_string()).unwrap_or_default();
                        let _ = events.send((scope, ChannelEvent::Disconnected { reason }));
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send((
                            scope,
                            ChannelEvent::Disconnected {
                                reason: e.to_string(),
                            },
                        ));
                        return;
                    }
                }
            }
            debug!("live channel stream ended");
        });

        Ok(LiveChannel {
            scope,
            room: room.map(str::to_string),
            username: username.to_string(),
            out_tx,
            reader,
        })
    }

    pub fn scope(&self) -> ChannelScope {
        self.scope
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Fire-and-forget message send.
    pub fn send(&self, content: &str) {
        self.dispatch(ClientEvent::SendMessage {
            text: content.to_string(),
        });
    }

    pub fn notify_typing(&self) {
        if let Some(room) = &self.room {
            self.dispatch(ClientEvent::Typing {
                room: room.clone(),
                username: self.username.clone(),
            });
        }
    }

    pub fn notify_stopped_typing(&self) {
        if let Some(room) = &self.room {
            self.dispatch(ClientEvent::StopTyping {
                room: room.clone(),
                username: self.username.clone(),
            });
        }
    }

    fn dispatch(&self, event: ClientEvent) {
        if self.out_tx.send(event).is_err() {
            debug!("live channel writer gone; dropping outbound event");
        }
    }

    /// Synchronous teardown. Dropping the outbound queue lets the writer
    /// flush a close frame; the reader is aborted so no further events
    /// surface from this handle.
    pub fn close(self) {
        drop(self.out_tx);
        self.reader.abort();
        if let Some(room) = &self.room {
            info!("live channel closed for room {}", room);
        } else {
            info!("session-scoped live channel closed");
        }
    }
}

fn map_event(event: ServerEvent, fallback_room: Option<&str>) -> ChannelEvent {
    match event {
        ServerEvent::ReceiveMessage(wire) => ChannelEvent::Message(wire.into_message(fallback_room)),
        ServerEvent::RoomUsers(users) => ChannelEvent::Presence(users),
        ServerEvent::Typing(notice) => ChannelEvent::TypingStarted(notice.username),
        ServerEvent::StopTyping(notice) => ChannelEvent::TypingStopped(notice.username),
    }
}
