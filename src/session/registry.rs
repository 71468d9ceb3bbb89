//! Process-wide map from live surfaces to the sessions that own them.
//!
//! Sessions never hand out references to themselves. The registry keeps only
//! the owner identity and the sending half of each session's inbox, keyed by
//! surface. Every successful [`SessionRegistry::register`] returns a
//! [`Registration`] guard whose drop removes the entry, so an entry cannot
//! outlive its session whichever way the session ends.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::chat::{ChatEvent, IncomingMessage, SurfaceId, TriggerEvent, UserId};

/// Events buffered per session before new ones are dropped.
const INBOX_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("surface {0} already has an active session")]
    Occupied(SurfaceId),
}

/// A read-only snapshot of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub session_id: u64,
    pub owner: UserId,
    pub surface: SurfaceId,
}

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to this many session inboxes.
    Delivered(usize),
    /// The actor is not the session owner; the event was discarded.
    NotOwner,
    /// No session owns the target.
    NoSession,
    /// The owning session's inbox was full or already closed.
    Dropped,
}

/// Receiving half of a session's event feed.
pub struct Inbox {
    pub(crate) added: mpsc::Receiver<TriggerEvent>,
    pub(crate) removed: mpsc::Receiver<TriggerEvent>,
    pub(crate) messages: mpsc::Receiver<IncomingMessage>,
}

struct Slot {
    session_id: u64,
    owner: UserId,
    added: mpsc::Sender<TriggerEvent>,
    removed: mpsc::Sender<TriggerEvent>,
    messages: mpsc::Sender<IncomingMessage>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SurfaceId, Slot>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Claim `surface` for a session owned by `owner`.
    ///
    /// Fails if another session already owns the surface. The returned guard
    /// must be kept alive for as long as the session runs.
    pub fn register(
        self: &Arc<Self>,
        surface: SurfaceId,
        owner: UserId,
    ) -> Result<(Registration, Inbox), RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&surface) {
            return Err(RegistryError::Occupied(surface));
        }

        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (added_tx, added_rx) = mpsc::channel(INBOX_CAPACITY);
        let (removed_tx, removed_rx) = mpsc::channel(INBOX_CAPACITY);
        let (messages_tx, messages_rx) = mpsc::channel(INBOX_CAPACITY);

        sessions.insert(
            surface,
            Slot {
                session_id,
                owner,
                added: added_tx,
                removed: removed_tx,
                messages: messages_tx,
            },
        );
        debug!(%surface, owner, session_id, "session registered");

        Ok((
            Registration {
                registry: Arc::clone(self),
                surface,
                session_id,
                released: false,
            },
            Inbox {
                added: added_rx,
                removed: removed_rx,
                messages: messages_rx,
            },
        ))
    }

    pub fn lookup(&self, surface: SurfaceId) -> Option<SessionEntry> {
        self.sessions.read().get(&surface).map(|slot| SessionEntry {
            session_id: slot.session_id,
            owner: slot.owner,
            surface,
        })
    }

    /// Remove whatever session owns `surface`. Returns whether one did.
    pub fn unregister(&self, surface: SurfaceId) -> bool {
        let removed = self.sessions.write().remove(&surface).is_some();
        if removed {
            debug!(%surface, "session unregistered");
        }
        removed
    }

    /// Remove the entry only if it still belongs to `session_id`.
    fn unregister_session(&self, surface: SurfaceId, session_id: u64) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(&surface) {
            Some(slot) if slot.session_id == session_id => {
                sessions.remove(&surface);
                debug!(%surface, session_id, "session unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Deliver one gateway event to the session it concerns.
    ///
    /// Trigger events only reach the session owning their surface, and only
    /// when asserted by its owner. Messages reach every session in that
    /// channel owned by the author.
    pub fn route(&self, event: &ChatEvent) -> Routed {
        let sessions = self.sessions.read();
        match event {
            ChatEvent::TriggerAdded(trigger) | ChatEvent::TriggerRemoved(trigger) => {
                let Some(slot) = sessions.get(&trigger.surface) else {
                    return Routed::NoSession;
                };
                if slot.owner != trigger.user {
                    return Routed::NotOwner;
                }
                let tx = if matches!(event, ChatEvent::TriggerAdded(_)) {
                    &slot.added
                } else {
                    &slot.removed
                };
                match tx.try_send(trigger.clone()) {
                    Ok(()) => Routed::Delivered(1),
                    Err(e) => {
                        warn!(surface = %trigger.surface, error = %e, "dropping trigger event");
                        Routed::Dropped
                    }
                }
            }
            ChatEvent::MessageCreated(message) => {
                let mut delivered = 0;
                let mut matched = false;
                for (surface, slot) in sessions.iter() {
                    if surface.channel != message.channel || slot.owner != message.author {
                        continue;
                    }
                    matched = true;
                    if slot.messages.try_send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
                match (matched, delivered) {
                    (false, _) => Routed::NoSession,
                    (true, 0) => Routed::Dropped,
                    (true, n) => Routed::Delivered(n),
                }
            }
        }
    }

    /// Route everything arriving on `events` until the bus closes.
    pub async fn dispatch(self: Arc<Self>, mut events: broadcast::Receiver<ChatEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let routed = self.route(&event);
                    debug!(?routed, "gateway event routed");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session dispatcher lagged behind the gateway");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Keeps a registry entry alive. Dropping it unregisters the session.
pub struct Registration {
    registry: Arc<SessionRegistry>,
    surface: SurfaceId,
    session_id: u64,
    released: bool,
}

impl Registration {
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Unregister now. Returns whether the entry was still present.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry
            .unregister_session(self.surface, self.session_id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.released {
            self.registry
                .unregister_session(self.surface, self.session_id);
        }
    }
}
