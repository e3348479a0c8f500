// One live room actor per document key.
//
// The registry is the single point of creation, so concurrent first
// accesses for the same key converge on one actor. Rooms remove their
// own entries on idle exit (via the wrapper task below); a stale entry
// whose actor is gone is detected by send/ack failure and replaced,
// which re-runs hydration from the snapshot store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use sessionroom_common::protocol::ws::Presence;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::room::{run_room, Identity, RoomCommand};
use crate::store::SnapshotStore;

/// Attempts before giving up on a key whose actor keeps failing
/// (e.g. hydration errors against a broken store).
const JOIN_ATTEMPTS: usize = 3;

struct RoomEntry {
    commands: mpsc::UnboundedSender<RoomCommand>,
    instance: u64,
}

/// A connection's membership in a live room.
pub struct JoinedRoom {
    pub commands: mpsc::UnboundedSender<RoomCommand>,
    pub connection_id: u64,
    pub presence: Presence,
}

pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<String, RoomEntry>>>,
    store: SnapshotStore,
    flush_delay: Duration,
    next_instance: AtomicU64,
}

impl RoomRegistry {
    pub fn new(store: SnapshotStore, flush_delay: Duration) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            store,
            flush_delay,
            next_instance: AtomicU64::new(1),
        }
    }

    /// Resolve the live actor for `key`, spawning one if none exists.
    pub async fn get_or_create(&self, key: &str) -> mpsc::UnboundedSender<RoomCommand> {
        let mut rooms = self.rooms.lock().await;
        if let Some(entry) = rooms.get(key) {
            if !entry.commands.is_closed() {
                return entry.commands.clone();
            }
            // Actor exited but its cleanup has not run yet.
            rooms.remove(key);
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        rooms.insert(
            key.to_owned(),
            RoomEntry { commands: commands_tx.clone(), instance },
        );
        debug!(room = %key, instance, "creating room");

        let rooms_for_cleanup = Arc::clone(&self.rooms);
        let key_for_actor = key.to_owned();
        let store = self.store.clone();
        let flush_delay = self.flush_delay;
        let actor_commands = commands_tx.clone();
        tokio::spawn(async move {
            run_room(key_for_actor.clone(), store, flush_delay, actor_commands, commands_rx).await;

            // Only remove our own entry; a replacement actor may
            // already be registered under this key.
            let mut rooms = rooms_for_cleanup.lock().await;
            if rooms.get(&key_for_actor).is_some_and(|entry| entry.instance == instance) {
                rooms.remove(&key_for_actor);
            }
        });

        commands_tx
    }

    /// Join a room, transparently recreating an evicted actor. The new
    /// connection's frames are delivered through `outbound`.
    pub async fn join(
        &self,
        key: &str,
        identity: Identity,
        outbound: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<JoinedRoom> {
        for _ in 0..JOIN_ATTEMPTS {
            let commands = self.get_or_create(key).await;
            let (ack_tx, ack_rx) = oneshot::channel();
            let sent = commands.send(RoomCommand::Join {
                identity: identity.clone(),
                outbound: outbound.clone(),
                ack: ack_tx,
            });
            if sent.is_err() {
                // Raced an idle exit; loop re-resolves the key.
                continue;
            }
            match ack_rx.await {
                Ok(ack) => {
                    return Ok(JoinedRoom {
                        commands,
                        connection_id: ack.connection_id,
                        presence: ack.presence,
                    });
                }
                Err(_) => continue,
            }
        }

        bail!("room `{key}` failed to accept a connection after {JOIN_ATTEMPTS} attempts");
    }

    /// Number of live room actors (for logs and tests).
    pub async fn live_rooms(&self) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.values().filter(|entry| !entry.commands.is_closed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionroom_common::protocol::ws::{decode_frame, WsMessage};

    fn registry() -> RoomRegistry {
        RoomRegistry::new(SnapshotStore::in_memory(), Duration::from_millis(5_000))
    }

    fn identity(email: &str) -> Identity {
        Identity { email: email.to_string(), name: None }
    }

    #[tokio::test]
    async fn same_key_resolves_to_the_same_actor() {
        let registry = registry();
        let first = registry.get_or_create("alpha").await;
        let second = registry.get_or_create("alpha").await;
        assert!(first.same_channel(&second));

        let other = registry.get_or_create("beta").await;
        assert!(!first.same_channel(&other));
    }

    #[tokio::test]
    async fn join_retries_across_an_idle_exit() {
        let registry = registry();

        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let joined = registry
            .join("alpha", identity("x@example.com"), outbound_tx)
            .await
            .expect("join should succeed");
        assert_eq!(registry.live_rooms().await, 1);

        // Graceful leave empties the room; the actor exits.
        joined
            .commands
            .send(RoomCommand::Leave { connection_id: joined.connection_id, graceful: true })
            .expect("leave should send");
        tokio::task::yield_now().await;
        assert_eq!(registry.live_rooms().await, 0);

        // A later join transparently gets a fresh actor.
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let rejoined = registry
            .join("alpha", identity("y@example.com"), outbound_tx)
            .await
            .expect("rejoin should succeed");
        assert!(!rejoined.commands.is_closed());

        let frame = outbound_rx.recv().await.expect("rejoin handshake frame");
        let WsMessage::SyncInit { .. } = decode_frame(&frame).expect("should decode") else {
            panic!("first frame must be sync-init");
        };
    }

    #[tokio::test]
    async fn join_fails_cleanly_when_hydration_keeps_failing() {
        let store = SnapshotStore::in_memory();
        store.fail_reads_for_tests();
        let registry = RoomRegistry::new(store, Duration::from_millis(5_000));

        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let result = registry.join("alpha", identity("x@example.com"), outbound_tx).await;
        assert!(result.is_err());
        assert_eq!(registry.live_rooms().await, 0);
    }
}
