//! A [`ChatClient`] that draws to a terminal and reads triggers from stdin.
//!
//! There is one channel and one user. Typing a navigation word (`next`,
//! `prev`, `first`, `last`, `jump`, `stop`, `help`) or its symbol asserts
//! that trigger on the newest message carrying triggers; prefixing it with
//! `-` retracts it.
//! Anything else is posted as a plain message, which is how jump prompts get
//! their answer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use super::{
    ChannelId, ChatClient, ChatError, ChatEvent, IncomingMessage, MessageId, Permissions, Render,
    SurfaceId, TriggerEvent, UserId,
};
use crate::events::EventBus;
use crate::session::NavAction;

/// The only channel a terminal has.
pub const TERMINAL_CHANNEL: ChannelId = 1;
/// The person at the keyboard.
pub const TERMINAL_USER: UserId = 1;

const RULE_WIDTH: usize = 60;

fn action_for_word(word: &str) -> Option<NavAction> {
    let action = match word {
        "first" => NavAction::First,
        "prev" | "previous" | "back" => NavAction::Previous,
        "next" => NavAction::Next,
        "last" => NavAction::Last,
        "jump" => NavAction::Jump,
        "stop" => NavAction::Stop,
        "help" => NavAction::Help,
        other => return NavAction::from_symbol(other),
    };
    Some(action)
}

/// Flatten a render into terminal text.
pub fn render_to_text(render: &Render) -> String {
    let mut lines = Vec::new();
    if let Some(content) = &render.content {
        lines.push(content.clone());
    }
    if let Some(embed) = &render.embed {
        lines.push("=".repeat(RULE_WIDTH));
        if let Some(title) = &embed.title {
            lines.push(title.clone());
            lines.push("-".repeat(RULE_WIDTH));
        }
        if let Some(description) = &embed.description {
            lines.push(description.clone());
        }
        for field in &embed.fields {
            lines.push(format!("{}:", field.name));
            lines.push(format!("  {}", field.value));
        }
        if let Some(footer) = &embed.footer {
            lines.push("-".repeat(RULE_WIDTH));
            lines.push(footer.clone());
        }
        lines.push("=".repeat(RULE_WIDTH));
    }
    lines.join("\n")
}

pub struct TerminalChat {
    out: Mutex<Box<dyn Write + Send>>,
    next_id: AtomicU64,
    /// Newest message with triggers attached. Prompts and notices never have any.
    latest_surface: Mutex<Option<SurfaceId>>,
    triggers: Mutex<HashMap<SurfaceId, Vec<String>>>,
}

impl Default for TerminalChat {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalChat {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicU64::new(1),
            latest_surface: Mutex::new(None),
            triggers: Mutex::new(HashMap::new()),
        }
    }

    fn write_block(&self, header: &str, body: &str) -> Result<(), ChatError> {
        let mut out = self.out.lock();
        writeln!(out, "\n[{header}]\n{body}")
            .and_then(|_| out.flush())
            .map_err(|e| ChatError::Other(e.to_string()))
    }

    fn write_note(&self, note: &str) -> Result<(), ChatError> {
        let mut out = self.out.lock();
        writeln!(out, "({note})")
            .and_then(|_| out.flush())
            .map_err(|e| ChatError::Other(e.to_string()))
    }

    fn forget(&self, surface: SurfaceId) {
        self.triggers.lock().remove(&surface);
        let mut latest = self.latest_surface.lock();
        if *latest == Some(surface) {
            *latest = None;
        }
    }

    /// Triggers currently attached to `surface`, in attach order.
    pub fn triggers_on(&self, surface: SurfaceId) -> Vec<String> {
        self.triggers
            .lock()
            .get(&surface)
            .cloned()
            .unwrap_or_default()
    }

    /// Turn one line of input into the event it stands for.
    pub fn event_for(&self, line: &str) -> Option<ChatEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (removed, word) = match line.strip_prefix('-') {
            Some(rest) if !rest.is_empty() && !rest.starts_with(|c: char| c.is_ascii_digit()) => {
                (true, rest)
            }
            _ => (false, line),
        };

        if let Some(action) = action_for_word(&word.to_lowercase())
            && let Some(surface) = *self.latest_surface.lock()
        {
            let trigger = TriggerEvent {
                surface,
                user: TERMINAL_USER,
                symbol: action.symbol().to_string(),
            };
            return Some(if removed {
                ChatEvent::TriggerRemoved(trigger)
            } else {
                ChatEvent::TriggerAdded(trigger)
            });
        }

        Some(ChatEvent::MessageCreated(IncomingMessage {
            channel: TERMINAL_CHANNEL,
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            author: TERMINAL_USER,
            content: line.to_string(),
        }))
    }

    /// Feed lines from `input` onto `bus` until it reaches end of file.
    pub async fn read_input<R>(&self, input: R, bus: &EventBus) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(event) = self.event_for(&line) {
                let receivers = bus.emit(event);
                debug!(receivers, "terminal input emitted");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChatClient for TerminalChat {
    async fn send(&self, _channel: ChannelId, render: &Render) -> Result<MessageId, ChatError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.write_block(&format!("#{id}"), &render_to_text(render))?;
        Ok(id)
    }

    async fn edit(&self, surface: SurfaceId, render: &Render) -> Result<(), ChatError> {
        self.write_block(
            &format!("#{} edited", surface.message),
            &render_to_text(render),
        )
    }

    async fn delete(&self, surface: SurfaceId) -> Result<(), ChatError> {
        self.forget(surface);
        self.write_note(&format!("#{} deleted", surface.message))
    }

    async fn delete_messages(
        &self,
        _channel: ChannelId,
        messages: &[MessageId],
    ) -> Result<(), ChatError> {
        let ids: Vec<String> = messages.iter().map(|id| format!("#{id}")).collect();
        self.write_note(&format!("{} deleted", ids.join(", ")))
    }

    async fn add_trigger(&self, surface: SurfaceId, symbol: &str) -> Result<(), ChatError> {
        let mut triggers = self.triggers.lock();
        let attached = triggers.entry(surface).or_default();
        if !attached.iter().any(|s| s == symbol) {
            attached.push(symbol.to_string());
        }
        *self.latest_surface.lock() = Some(surface);
        Ok(())
    }

    async fn remove_trigger(&self, surface: SurfaceId, symbol: &str) -> Result<(), ChatError> {
        if let Some(attached) = self.triggers.lock().get_mut(&surface) {
            attached.retain(|s| s != symbol);
        }
        Ok(())
    }

    async fn clear_triggers(&self, surface: SurfaceId) -> Result<(), ChatError> {
        self.forget(surface);
        self.write_note(&format!("#{} is no longer interactive", surface.message))
    }

    async fn permissions(&self, _channel: ChannelId) -> Result<Permissions, ChatError> {
        Ok(Permissions::all())
    }

    async fn private_channel(&self, _user: UserId) -> Result<ChannelId, ChatError> {
        Ok(TERMINAL_CHANNEL)
    }
}
