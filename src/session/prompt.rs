//! The numbered-jump prompt and message cleanup.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chat::{ChannelId, ChatClient, ChatError, IncomingMessage, MessageId, Render, SurfaceId};
use crate::consts::{JUMP_QUESTION, JUMP_TOO_SLOW, page_missing_notice};

/// How many of the requested messages were actually removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub requested: usize,
    pub deleted: usize,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.deleted == self.requested
    }
}

/// Delete `messages`, in bulk when possible.
///
/// If the bulk request fails every message is retried on its own and the
/// report says how many of them went away.
pub async fn delete_all(
    client: &dyn ChatClient,
    channel: ChannelId,
    messages: &[MessageId],
) -> CleanupReport {
    let mut report = CleanupReport {
        requested: messages.len(),
        deleted: 0,
    };
    if messages.is_empty() {
        return report;
    }

    if messages.len() >= 2 {
        match client.delete_messages(channel, messages).await {
            Ok(()) => {
                report.deleted = messages.len();
                return report;
            }
            Err(error) => {
                warn!(
                    %error,
                    channel,
                    count = messages.len(),
                    "bulk delete failed, falling back to single delete"
                );
            }
        }
    }

    for message in messages {
        if client
            .delete(SurfaceId::new(channel, *message))
            .await
            .is_ok()
        {
            report.deleted += 1;
        }
    }
    report
}

/// Result of asking the owner for a page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    /// A valid page was entered.
    Jumped(usize),
    /// A number was entered but no such page exists.
    OutOfRange(usize),
    /// No digits-only reply arrived in time.
    TimedOut,
}

fn is_digits(content: &str) -> bool {
    !content.is_empty() && content.chars().all(|c| c.is_ascii_digit())
}

/// Ask for a page number in `channel` and wait for a digits-only reply.
///
/// `replies` only carries messages from the session owner in `channel`.
/// Everything the prompt posts, plus the reply, is deleted before returning,
/// whatever the outcome.
pub async fn ask_page(
    client: &dyn ChatClient,
    channel: ChannelId,
    replies: &mut mpsc::Receiver<IncomingMessage>,
    maximum_pages: usize,
    timeout: Duration,
    linger: Duration,
) -> Result<(JumpOutcome, CleanupReport), ChatError> {
    // Anything typed before the prompt is not an answer to it.
    while replies.try_recv().is_ok() {}

    let mut to_delete = vec![client.send(channel, &Render::text(JUMP_QUESTION)).await?];

    let reply = tokio::time::timeout(timeout, async {
        while let Some(message) = replies.recv().await {
            if is_digits(&message.content) {
                return Some(message);
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    let outcome = match reply {
        None => {
            if let Ok(id) = client.send(channel, &Render::text(JUMP_TOO_SLOW)).await {
                to_delete.push(id);
            }
            tokio::time::sleep(linger).await;
            JumpOutcome::TimedOut
        }
        Some(message) => {
            to_delete.push(message.id);
            // Only overflow can fail here; such a page is out of range anyway.
            let page = message.content.parse::<usize>().unwrap_or(usize::MAX);
            if page != 0 && page <= maximum_pages {
                JumpOutcome::Jumped(page)
            } else {
                let notice =
                    Render::text(page_missing_notice(&message.content, maximum_pages));
                if let Ok(id) = client.send(channel, &notice).await {
                    to_delete.push(id);
                }
                tokio::time::sleep(linger).await;
                JumpOutcome::OutOfRange(page)
            }
        }
    };

    let report = delete_all(client, channel, &to_delete).await;
    if report.is_complete() {
        debug!(?outcome, deleted = report.deleted, "jump prompt cleaned up");
    } else {
        warn!(
            ?outcome,
            requested = report.requested,
            deleted = report.deleted,
            "jump prompt cleanup was partial"
        );
    }
    Ok((outcome, report))
}
