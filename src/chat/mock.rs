//! Chat client that records every call, for tests.
//!
//! Knobs on [`MockChat`] make individual operations fail so the session
//! fallbacks can be exercised.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{ChannelId, ChatClient, ChatError, MessageId, Permissions, Render, SurfaceId, UserId};

/// One recorded call against [`MockChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Send {
        channel: ChannelId,
        message: MessageId,
        render: Render,
    },
    Edit {
        surface: SurfaceId,
        render: Render,
    },
    Delete {
        surface: SurfaceId,
    },
    DeleteMessages {
        channel: ChannelId,
        messages: Vec<MessageId>,
    },
    AddTrigger {
        surface: SurfaceId,
        symbol: String,
    },
    RemoveTrigger {
        surface: SurfaceId,
        symbol: String,
    },
    ClearTriggers {
        surface: SurfaceId,
    },
}

/// A recording chat client for tests. Every call is kept in order.
pub struct MockChat {
    calls: Mutex<Vec<ChatCall>>,
    next_id: AtomicU64,
    permissions: Mutex<Permissions>,
    private_channel: Mutex<Option<ChannelId>>,
    gone: Mutex<HashSet<MessageId>>,
    forbid_clear: AtomicBool,
    forbid_bulk_delete: AtomicBool,
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChat {
    /// Message ids handed out by `send` start here.
    pub const FIRST_MESSAGE_ID: MessageId = 1000;

    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(Self::FIRST_MESSAGE_ID),
            permissions: Mutex::new(Permissions::all()),
            private_channel: Mutex::new(None),
            gone: Mutex::new(HashSet::new()),
            forbid_clear: AtomicBool::new(false),
            forbid_bulk_delete: AtomicBool::new(false),
        }
    }

    pub fn with_permissions(self, permissions: Permissions) -> Self {
        *self.permissions.lock() = permissions;
        self
    }

    /// Make `private_channel` succeed with the given channel.
    pub fn with_private_channel(self, channel: ChannelId) -> Self {
        *self.private_channel.lock() = Some(channel);
        self
    }

    /// `clear_triggers` fails with `Forbidden`.
    pub fn forbid_clear_triggers(self) -> Self {
        self.forbid_clear.store(true, Ordering::SeqCst);
        self
    }

    /// `delete_messages` fails with `Forbidden`.
    pub fn forbid_bulk_delete(self) -> Self {
        self.forbid_bulk_delete.store(true, Ordering::SeqCst);
        self
    }

    /// Simulate someone else deleting a message.
    pub fn delete_externally(&self, message: MessageId) {
        self.gone.lock().insert(message);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().clone()
    }

    /// Renders sent as new messages to a channel, in order.
    pub fn sent_to(&self, channel: ChannelId) -> Vec<(MessageId, Render)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ChatCall::Send {
                    channel: c,
                    message,
                    render,
                } if *c == channel => Some((*message, render.clone())),
                _ => None,
            })
            .collect()
    }

    /// Renders applied to a surface by `edit`, in order.
    pub fn edits(&self, surface: SurfaceId) -> Vec<Render> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ChatCall::Edit { surface: s, render } if *s == surface => Some(render.clone()),
                _ => None,
            })
            .collect()
    }

    /// Trigger symbols attached to a surface, in order.
    pub fn triggers_added(&self, surface: SurfaceId) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ChatCall::AddTrigger { surface: s, symbol } if *s == surface => {
                    Some(symbol.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&ChatCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: ChatCall) {
        self.calls.lock().push(call);
    }

    fn check_alive(&self, message: MessageId) -> Result<(), ChatError> {
        if self.gone.lock().contains(&message) {
            Err(ChatError::NotFound)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn send(&self, channel: ChannelId, render: &Render) -> Result<MessageId, ChatError> {
        let message = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(ChatCall::Send {
            channel,
            message,
            render: render.clone(),
        });
        Ok(message)
    }

    async fn edit(&self, surface: SurfaceId, render: &Render) -> Result<(), ChatError> {
        self.check_alive(surface.message)?;
        self.record(ChatCall::Edit {
            surface,
            render: render.clone(),
        });
        Ok(())
    }

    async fn delete(&self, surface: SurfaceId) -> Result<(), ChatError> {
        self.check_alive(surface.message)?;
        self.record(ChatCall::Delete { surface });
        self.gone.lock().insert(surface.message);
        Ok(())
    }

    async fn delete_messages(
        &self,
        channel: ChannelId,
        messages: &[MessageId],
    ) -> Result<(), ChatError> {
        if self.forbid_bulk_delete.load(Ordering::SeqCst) {
            return Err(ChatError::Forbidden);
        }
        self.record(ChatCall::DeleteMessages {
            channel,
            messages: messages.to_vec(),
        });
        self.gone.lock().extend(messages.iter().copied());
        Ok(())
    }

    async fn add_trigger(&self, surface: SurfaceId, symbol: &str) -> Result<(), ChatError> {
        self.check_alive(surface.message)?;
        self.record(ChatCall::AddTrigger {
            surface,
            symbol: symbol.to_string(),
        });
        Ok(())
    }

    async fn remove_trigger(&self, surface: SurfaceId, symbol: &str) -> Result<(), ChatError> {
        self.check_alive(surface.message)?;
        self.record(ChatCall::RemoveTrigger {
            surface,
            symbol: symbol.to_string(),
        });
        Ok(())
    }

    async fn clear_triggers(&self, surface: SurfaceId) -> Result<(), ChatError> {
        self.check_alive(surface.message)?;
        if self.forbid_clear.load(Ordering::SeqCst) {
            return Err(ChatError::Forbidden);
        }
        self.record(ChatCall::ClearTriggers { surface });
        Ok(())
    }

    async fn permissions(&self, _channel: ChannelId) -> Result<Permissions, ChatError> {
        Ok(*self.permissions.lock())
    }

    async fn private_channel(&self, _user: UserId) -> Result<ChannelId, ChatError> {
        (*self.private_channel.lock()).ok_or(ChatError::Forbidden)
    }
}
