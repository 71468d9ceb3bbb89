//! Project-wide constants.

use std::time::Duration;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Colour used for every embed a session renders.
pub const EMBED_COLOUR: u32 = 0x7c_de_f9;

/// How long a session waits for a trigger before shutting itself down.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// How long the numbered-jump prompt waits for the owner's reply.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before the help render is replaced by the page the user was on.
pub const HELP_RETURN_DELAY: Duration = Duration::from_secs(60);

/// How long a prompt notice stays visible before it is cleaned up.
pub const NOTICE_LINGER: Duration = Duration::from_secs(5);

/// Default entries per page for list layouts.
pub const DEFAULT_PER_PAGE: usize = 12;

/// Largest message a text page may occupy, prefix and suffix included.
pub const TEXT_PAGE_MAX_SIZE: usize = 2000 - 200;

/// Deadline for a bounded fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest payload a bounded fetch will buffer.
pub const FETCH_MAX_SIZE: u64 = 3_000_000;

/// Per-attempt deadline when posting to paste mirrors.
pub const MIRROR_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Paste services tried in order by [`BoundedFetcher::post_first_reachable`].
///
/// [`BoundedFetcher::post_first_reachable`]: crate::fetch::BoundedFetcher::post_first_reachable
pub const PASTE_MIRRORS: &[&str] = &[
    "https://mystb.in/",
    "https://hastebin.com/",
    "https://paste.pydis.com/",
    "https://wastebin.travitia.xyz/",
];

// UI strings rendered by sessions.

pub const HELP_HINT: &str = "Confused? React with \u{2139} for more info.";
pub const HELP_WELCOME: &str = "Welcome to the interactive paginator!\n";
pub const HELP_INTRO: &str =
    "This lets you navigate through pages using reactions. They are:\n";
pub const JUMP_QUESTION: &str = "Which page do you want to go to?";
pub const JUMP_TOO_SLOW: &str = "You took too long.";

/// Notice posted when a session lacks a capability in its channel.
pub fn permission_notice(capability: &str) -> String {
    format!(
        "Sorry, this command needs the **{capability}** permission to work in this channel. \
         See you in your private messages instead (ask an administrator to avoid this)."
    )
}

/// Notice posted when the owner asks for a page outside the session.
pub fn page_missing_notice(page: &str, maximum: usize) -> String {
    format!("That page does not exist. ({page}/{maximum})")
}

/// Footer shown on the help render.
pub fn help_footer(page: usize) -> String {
    format!("We were on page {page} before this message.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consts_from_cargo_toml() {
        assert!(!AUTHOR.is_empty());
        assert!(REPO.contains("katbot"));
    }

    #[test]
    fn mirrors_end_with_slash() {
        for mirror in PASTE_MIRRORS {
            assert!(mirror.ends_with('/'), "{mirror} must end with '/'");
        }
    }

    #[test]
    fn text_pages_leave_room_for_footer() {
        assert!(TEXT_PAGE_MAX_SIZE < 2000);
    }

    #[test]
    fn notices_mention_their_arguments() {
        assert!(permission_notice("add reactions").contains("**add reactions**"));
        assert_eq!(page_missing_notice("7", 3), "That page does not exist. (7/3)");
        assert!(help_footer(2).contains("page 2"));
    }
}
