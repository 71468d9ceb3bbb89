//! The chat platform as seen by the coordination core.
//!
//! Nothing in this crate speaks a chat protocol. Hosts implement
//! [`ChatClient`] on top of whatever transport they use and feed gateway
//! events into an [`EventBus`](crate::events::EventBus).

pub mod mock;
pub mod terminal;

use async_trait::async_trait;

pub type UserId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;

/// A rendered message a session owns and edits in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    pub channel: ChannelId,
    pub message: MessageId,
}

impl SurfaceId {
    pub fn new(channel: ChannelId, message: MessageId) -> Self {
        Self { channel, message }
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel, self.message)
    }
}

/// A name/value pair shown inside an embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// Rich, non-text content. The chat client decides how to draw it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub colour: u32,
}

/// Everything that goes into one send or edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Render {
    pub content: Option<String>,
    pub embed: Option<Embed>,
}

impl Render {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
        }
    }
}

/// Capabilities a session may need in its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SendMessages,
    EmbedLinks,
    AddReactions,
    ReadMessageHistory,
}

impl Capability {
    /// Human-readable name used in permission notices.
    pub fn label(self) -> &'static str {
        match self {
            Capability::SendMessages => "send messages",
            Capability::EmbedLinks => "embed links",
            Capability::AddReactions => "add reactions",
            Capability::ReadMessageHistory => "read message history",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What the bot itself may do in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub send_messages: bool,
    pub embed_links: bool,
    pub add_reactions: bool,
    pub read_message_history: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            send_messages: true,
            embed_links: true,
            add_reactions: true,
            read_message_history: true,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::SendMessages => self.send_messages,
            Capability::EmbedLinks => self.embed_links,
            Capability::AddReactions => self.add_reactions,
            Capability::ReadMessageHistory => self.read_message_history,
        }
    }

    /// Remove a capability (builder style, handy for tests and hosts).
    pub fn without(mut self, capability: Capability) -> Self {
        match capability {
            Capability::SendMessages => self.send_messages = false,
            Capability::EmbedLinks => self.embed_links = false,
            Capability::AddReactions => self.add_reactions = false,
            Capability::ReadMessageHistory => self.read_message_history = false,
        }
        self
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

/// A user asserted or retracted a trigger on a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub surface: SurfaceId,
    pub user: UserId,
    pub symbol: String,
}

/// A plain message posted in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub channel: ChannelId,
    pub id: MessageId,
    pub author: UserId,
    pub content: String,
}

/// Gateway events the coordination core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    TriggerAdded(TriggerEvent),
    TriggerRemoved(TriggerEvent),
    MessageCreated(IncomingMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The target message or channel no longer exists.
    #[error("not found")]
    NotFound,
    /// The platform refused the operation.
    #[error("forbidden")]
    Forbidden,
    #[error("chat client error: {0}")]
    Other(String),
}

/// The chat platform operations a session needs.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Post a new message, returning its id.
    async fn send(&self, channel: ChannelId, render: &Render) -> Result<MessageId, ChatError>;

    async fn edit(&self, surface: SurfaceId, render: &Render) -> Result<(), ChatError>;

    async fn delete(&self, surface: SurfaceId) -> Result<(), ChatError>;

    /// Delete several messages in one request.
    async fn delete_messages(
        &self,
        channel: ChannelId,
        messages: &[MessageId],
    ) -> Result<(), ChatError>;

    async fn add_trigger(&self, surface: SurfaceId, symbol: &str) -> Result<(), ChatError>;

    /// Remove the bot's own trigger from a surface.
    async fn remove_trigger(&self, surface: SurfaceId, symbol: &str) -> Result<(), ChatError>;

    /// Remove every trigger from a surface. Usually needs elevated rights.
    async fn clear_triggers(&self, surface: SurfaceId) -> Result<(), ChatError>;

    /// The bot's own permissions in a channel.
    async fn permissions(&self, channel: ChannelId) -> Result<Permissions, ChatError>;

    /// The private channel with a user, created if absent.
    async fn private_channel(&self, user: UserId) -> Result<ChannelId, ChatError>;
}
