// The room coordinator actor.
//
// One tokio task per room key owns the document state, the connection
// table, and flush scheduling; all mutations arrive on a single command
// channel, so there is no locking anywhere in here. The registry
// guarantees at most one live actor per key.

use std::collections::BTreeMap;
use std::time::Duration;

use sessionroom_common::protocol::ws::{encode_frame, Presence, WsMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::doc::SessionDoc;
use crate::store::SnapshotStore;

/// Fixed palette for collaborator cursors.
pub const CURSOR_COLORS: [&str; 8] = [
    "#6366f1", // indigo
    "#14b8a6", // teal
    "#f97316", // orange
    "#f43f5e", // rose
    "#3b82f6", // blue
    "#10b981", // emerald
    "#a855f7", // purple
    "#ec4899", // pink
];

/// Verified identity attached to a connection by the upstream auth
/// layer. The room trusts it unconditionally.
#[derive(Debug, Clone)]
pub struct Identity {
    pub email: String,
    pub name: Option<String>,
}

impl Identity {
    /// Display name: the explicit name when given, otherwise the local
    /// part of the email address.
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => self.email.split('@').next().unwrap_or(&self.email).to_owned(),
        }
    }
}

/// Reply to a successful `Join`.
#[derive(Debug)]
pub struct JoinAck {
    pub connection_id: u64,
    pub presence: Presence,
}

/// Everything a room can be asked to do. Connection-scoped commands
/// carry the id handed out at join time.
pub enum RoomCommand {
    Join {
        identity: Identity,
        outbound: mpsc::UnboundedSender<String>,
        ack: oneshot::Sender<JoinAck>,
    },
    Leave {
        connection_id: u64,
        graceful: bool,
    },
    Update {
        connection_id: u64,
        data: Vec<u8>,
        raw: String,
    },
    Cursor {
        connection_id: u64,
        cursor: serde_json::Value,
    },
    Awareness {
        connection_id: u64,
        raw: String,
    },
    Flush,
}

struct RoomConnection {
    presence: Presence,
    outbound: mpsc::UnboundedSender<String>,
}

struct Room {
    key: String,
    store: SnapshotStore,
    flush_delay: Duration,
    commands: mpsc::UnboundedSender<RoomCommand>,
    doc: SessionDoc,
    // BTreeMap keyed by a monotonic id, so iteration order is join order.
    connections: BTreeMap<u64, RoomConnection>,
    next_connection_id: u64,
    color_cursor: usize,
    flush_scheduled: bool,
}

/// Run one room to completion. Returns when the room has no open
/// connections and no pending flush; the caller (registry) removes the
/// map entry afterwards.
///
/// Hydration happens before the first command is taken, so a joiner can
/// never observe a document that is about to be overwritten by the
/// persisted snapshot. A store read failure aborts startup; the
/// registry's join retry gives the key a fresh attempt.
pub(crate) async fn run_room(
    key: String,
    store: SnapshotStore,
    flush_delay: Duration,
    commands_tx: mpsc::UnboundedSender<RoomCommand>,
    mut commands_rx: mpsc::UnboundedReceiver<RoomCommand>,
) {
    let doc = match hydrate(&store, &key) {
        Ok(doc) => doc,
        Err(hydrate_error) => {
            error!(room = %key, error = ?hydrate_error, "room hydration failed");
            return;
        }
    };

    let mut room = Room {
        key,
        store,
        flush_delay,
        commands: commands_tx,
        doc,
        connections: BTreeMap::new(),
        next_connection_id: 1,
        color_cursor: 0,
        flush_scheduled: false,
    };

    while let Some(command) = commands_rx.recv().await {
        match command {
            RoomCommand::Join { identity, outbound, ack } => room.handle_join(identity, outbound, ack),
            RoomCommand::Leave { connection_id, graceful } => room.handle_leave(connection_id, graceful),
            RoomCommand::Update { connection_id, data, raw } => room.handle_update(connection_id, &data, &raw),
            RoomCommand::Cursor { connection_id, cursor } => room.handle_cursor(connection_id, cursor),
            RoomCommand::Awareness { connection_id, raw } => room.handle_awareness(connection_id, &raw),
            RoomCommand::Flush => room.handle_flush_timer(),
        }

        // Idle: nobody connected, nothing scheduled. The room is
        // evictable; the persisted snapshot is the durability boundary.
        if room.connections.is_empty() && !room.flush_scheduled {
            debug!(room = %room.key, "room idle, shutting down");
            break;
        }
    }
}

fn hydrate(store: &SnapshotStore, key: &str) -> anyhow::Result<SessionDoc> {
    match store.load(key)? {
        Some(snapshot) => SessionDoc::from_state(&snapshot),
        None => Ok(SessionDoc::new()),
    }
}

impl Room {
    fn handle_join(
        &mut self,
        identity: Identity,
        outbound: mpsc::UnboundedSender<String>,
        ack: oneshot::Sender<JoinAck>,
    ) {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let presence = Presence {
            email: identity.email.clone(),
            name: identity.display_name(),
            color: self.assign_color(),
        };

        if ack.send(JoinAck { connection_id, presence: presence.clone() }).is_err() {
            // The socket task is already gone; never register the
            // connection or it would linger as a ghost in the roster.
            return;
        }

        self.send_to(&outbound, &WsMessage::SyncInit { data: self.doc.encode_state() });

        self.connections.insert(connection_id, RoomConnection { presence: presence.clone(), outbound });

        let roster = self.connections.values().map(|c| c.presence.clone()).collect();
        if let Some(connection) = self.connections.get(&connection_id) {
            let outbound = connection.outbound.clone();
            self.send_to(&outbound, &WsMessage::PresenceInit { users: roster });
        }

        self.broadcast_message(&WsMessage::PresenceJoin { user: presence }, Some(connection_id));
        debug!(room = %self.key, connection_id, editors = self.connections.len(), "editor joined");
    }

    fn handle_leave(&mut self, connection_id: u64, graceful: bool) {
        let Some(removed) = self.connections.remove(&connection_id) else {
            return;
        };

        self.broadcast_message(&WsMessage::PresenceLeave { user: removed.presence }, None);
        debug!(room = %self.key, connection_id, graceful, editors = self.connections.len(), "editor left");

        // Last graceful leave flushes right away so the room can be
        // evicted with minimal staleness. Abnormal closes leave that to
        // any pending timer.
        if graceful && self.connections.is_empty() {
            self.flush();
            self.flush_scheduled = false;
        }
    }

    fn handle_update(&mut self, connection_id: u64, data: &[u8], raw: &str) {
        if let Err(apply_error) = self.doc.apply_update(data) {
            warn!(room = %self.key, connection_id, error = ?apply_error, "dropping unappliable update");
            return;
        }

        // Relay the sender's own encoding unchanged.
        self.broadcast_raw(raw, Some(connection_id));
        self.schedule_flush();
    }

    fn handle_cursor(&mut self, connection_id: u64, cursor: serde_json::Value) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };
        let wrapped = WsMessage::CursorUpdate {
            user: Some(connection.presence.clone()),
            cursor,
        };
        self.broadcast_message(&wrapped, Some(connection_id));
    }

    fn handle_awareness(&mut self, connection_id: u64, raw: &str) {
        self.broadcast_raw(raw, Some(connection_id));
    }

    fn handle_flush_timer(&mut self) {
        self.flush();
        self.flush_scheduled = false;
    }

    /// Fixed-delay debounce: schedule only if nothing is pending, never
    /// extend. A continuously edited document flushes at a steady
    /// cadence.
    fn schedule_flush(&mut self) {
        if self.flush_scheduled {
            return;
        }
        self.flush_scheduled = true;

        let commands = self.commands.clone();
        let delay = self.flush_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The room may have exited after an immediate flush; a
            // dropped timer tick is fine because the state it would
            // have written is already durable.
            let _ = commands.send(RoomCommand::Flush);
        });
    }

    /// Write the current full state. Failures are logged and otherwise
    /// swallowed; the next accepted update schedules another attempt.
    fn flush(&mut self) {
        let snapshot = self.doc.encode_state();
        match self.store.save(&self.key, &snapshot) {
            Ok(()) => debug!(room = %self.key, bytes = snapshot.len(), "snapshot persisted"),
            Err(save_error) => {
                error!(room = %self.key, error = ?save_error, "failed to persist snapshot");
            }
        }
    }

    /// Pick a palette color not held by any live connection, scanning
    /// from the round-robin cursor; fall back to plain rotation when
    /// all eight are taken. The cursor advances on every join either
    /// way, so the rotation matches the palette order under no churn.
    fn assign_color(&mut self) -> String {
        let start = self.color_cursor;
        self.color_cursor = self.color_cursor.wrapping_add(1);

        for offset in 0..CURSOR_COLORS.len() {
            let candidate = CURSOR_COLORS[(start + offset) % CURSOR_COLORS.len()];
            let in_use = self.connections.values().any(|c| c.presence.color == candidate);
            if !in_use {
                return candidate.to_owned();
            }
        }
        CURSOR_COLORS[start % CURSOR_COLORS.len()].to_owned()
    }

    fn broadcast_message(&self, message: &WsMessage, exclude: Option<u64>) {
        match encode_frame(message) {
            Ok(frame) => self.broadcast_raw(&frame, exclude),
            Err(encode_error) => {
                warn!(room = %self.key, error = ?encode_error, "failed to encode broadcast frame");
            }
        }
    }

    /// Best-effort fan-out in join order. A dead recipient is skipped;
    /// its own close path reaps it.
    fn broadcast_raw(&self, frame: &str, exclude: Option<u64>) {
        for (connection_id, connection) in &self.connections {
            if Some(*connection_id) == exclude {
                continue;
            }
            let _ = connection.outbound.send(frame.to_owned());
        }
    }

    fn send_to(&self, outbound: &mpsc::UnboundedSender<String>, message: &WsMessage) {
        match encode_frame(message) {
            Ok(frame) => {
                let _ = outbound.send(frame);
            }
            Err(encode_error) => {
                warn!(room = %self.key, error = ?encode_error, "failed to encode frame");
            }
        }
    }
}
