//! Reaction-driven paginated sessions.
//!
//! A [`PagedSession`] renders one page of a [`Pages`] onto a new message (its
//! surface), attaches the navigation triggers and then waits for the owner to
//! assert or retract one. Each accepted trigger is applied and the page is
//! re-rendered before the next one is looked at. The session ends on an
//! explicit stop, on timeout, when its surface disappears, or when its
//! registry entry is removed from outside.

pub mod action;
pub mod page;
pub mod prompt;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, error::Elapsed, timeout_at};
use tracing::{debug, info, warn};

use crate::chat::{
    Capability, ChannelId, ChatClient, ChatError, Permissions, Render, SurfaceId, TriggerEvent,
    UserId,
};
use crate::consts::{
    HELP_RETURN_DELAY, NOTICE_LINGER, PROMPT_TIMEOUT, SESSION_TIMEOUT, permission_notice,
};

pub use action::{NavAction, TRIGGER_TABLE};
pub use page::{Entry, PageKind, PageStyle, Pages};
pub use prompt::{CleanupReport, JumpOutcome};
pub use registry::{Inbox, Registration, RegistryError, Routed, SessionEntry, SessionRegistry};

pub struct SessionConfig {
    /// How long to wait for a trigger before stopping.
    pub timeout: Duration,
    /// How long the jump prompt waits for a reply.
    pub prompt_timeout: Duration,
    /// How long the help render stays up.
    pub help_return_delay: Duration,
    /// How long prompt notices stay up before cleanup.
    pub notice_linger: Duration,
    /// Delete the surface on an explicit stop instead of clearing triggers.
    pub stop_deletes: bool,
    pub style: PageStyle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: SESSION_TIMEOUT,
            prompt_timeout: PROMPT_TIMEOUT,
            help_return_delay: HELP_RETURN_DELAY,
            notice_linger: NOTICE_LINGER,
            stop_deletes: false,
            style: PageStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Rendering { first: bool },
    AwaitingEvent,
    Applying(NavAction),
    Stopped,
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Everything fit on one page; rendered once without interaction.
    Rendered,
    /// The owner asserted the stop trigger.
    Stopped,
    /// No trigger arrived before the deadline.
    TimedOut,
    /// The surface was deleted by someone else.
    SurfaceGone,
    /// The registry entry was removed from outside.
    Disconnected,
}

/// Final state of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub surface: Option<SurfaceId>,
    pub channel: ChannelId,
    pub final_page: usize,
    pub maximum_pages: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The channel lacks a capability and the owner cannot be reached privately.
    #[error("missing permission to {missing} and the owner's private channel is unreachable")]
    PermissionDenied { missing: Capability },
    #[error("render failed: {0}")]
    Render(#[source] ChatError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

enum Wake {
    Action(NavAction),
    ReturnFromHelp,
    TimedOut,
    Disconnected,
}

pub struct PagedSession {
    client: Arc<dyn ChatClient>,
    registry: Arc<SessionRegistry>,
    pages: Pages,
    config: SessionConfig,
    owner: UserId,
    channel: ChannelId,
    current_page: usize,
    paginating: bool,
    surface: Option<SurfaceId>,
    state: SessionState,
    attached: Vec<NavAction>,
    help_timer: Option<JoinHandle<()>>,
    help_tx: mpsc::Sender<()>,
    help_rx: mpsc::Receiver<()>,
}

impl PagedSession {
    pub fn new(
        client: Arc<dyn ChatClient>,
        registry: Arc<SessionRegistry>,
        owner: UserId,
        channel: ChannelId,
        pages: Pages,
    ) -> Self {
        let paginating = pages.maximum_pages() > 1;
        let (help_tx, help_rx) = mpsc::channel(1);
        Self {
            client,
            registry,
            pages,
            config: SessionConfig::default(),
            owner,
            channel,
            current_page: 1,
            paginating,
            surface: None,
            state: SessionState::Rendering { first: true },
            attached: Vec::new(),
            help_timer: None,
            help_tx,
            help_rx,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn maximum_pages(&self) -> usize {
        self.pages.maximum_pages()
    }

    pub fn paginating(&self) -> bool {
        self.paginating
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    /// Where output currently goes. Changes if the permission gate redirects.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn get_page(&self, page: usize) -> &[Entry] {
        self.pages.get_page(page)
    }

    /// The page a navigation action leads to, if it moves the cursor at all.
    ///
    /// Previous/next are bounds-checked and never wrap around.
    pub fn target_page(&self, action: NavAction) -> Option<usize> {
        let maximum = self.maximum_pages();
        let checked = |page: usize| (page != 0 && page <= maximum).then_some(page);
        match action {
            NavAction::First => checked(1),
            NavAction::Last => checked(maximum),
            NavAction::Next => checked(self.current_page + 1),
            NavAction::Previous => checked(self.current_page.saturating_sub(1)),
            NavAction::Jump | NavAction::Stop | NavAction::Help => None,
        }
    }

    /// The first capability the session needs but lacks, if any.
    pub fn missing_capability(&self, permissions: Permissions) -> Option<Capability> {
        let mut required = vec![Capability::SendMessages];
        if self.pages.needs_rich_render() {
            required.push(Capability::EmbedLinks);
        }
        if self.paginating {
            required.push(Capability::AddReactions);
            required.push(Capability::ReadMessageHistory);
        }
        required
            .into_iter()
            .find(|capability| !permissions.has(*capability))
    }

    /// Render the pages and drive the session until it ends.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        self.check_permissions().await?;

        self.state = SessionState::Rendering { first: true };
        let render = self
            .pages
            .render(1, true, self.paginating, &self.config.style);
        let message = self
            .client
            .send(self.channel, &render)
            .await
            .map_err(SessionError::Render)?;
        let surface = SurfaceId::new(self.channel, message);
        self.surface = Some(surface);
        self.current_page = 1;

        if !self.paginating {
            self.state = SessionState::Stopped;
            debug!(%surface, "single page rendered, no interaction");
            return Ok(self.report(SessionEnd::Rendered));
        }

        let (registration, mut inbox) = self.registry.register(surface, self.owner)?;
        info!(
            %surface,
            owner = self.owner,
            pages = self.maximum_pages(),
            "pagination session started"
        );

        let result = self.drive(surface, &mut inbox).await;
        registration.release();

        let end = result?;
        info!(%surface, ?end, page = self.current_page, "pagination session ended");
        Ok(self.report(end))
    }

    fn report(&self, end: SessionEnd) -> SessionReport {
        SessionReport {
            end,
            surface: self.surface,
            channel: self.channel,
            final_page: self.current_page,
            maximum_pages: self.maximum_pages(),
        }
    }

    async fn check_permissions(&mut self) -> Result<(), SessionError> {
        let permissions = self
            .client
            .permissions(self.channel)
            .await
            .map_err(SessionError::Render)?;
        let Some(missing) = self.missing_capability(permissions) else {
            return Ok(());
        };

        warn!(channel = self.channel, %missing, "session lacks a permission, redirecting");
        let notice = Render::text(permission_notice(missing.label()));
        if let Err(error) = self.client.send(self.channel, &notice).await {
            debug!(%error, "permission notice could not be posted");
        }

        match self.client.private_channel(self.owner).await {
            Ok(private) => {
                self.channel = private;
                Ok(())
            }
            Err(error) => {
                debug!(%error, owner = self.owner, "private channel unreachable");
                Err(SessionError::PermissionDenied { missing })
            }
        }
    }

    async fn drive(
        &mut self,
        surface: SurfaceId,
        inbox: &mut Inbox,
    ) -> Result<SessionEnd, SessionError> {
        for action in NavAction::attached_for(self.maximum_pages()) {
            if let Err(error) = self.client.add_trigger(surface, action.symbol()).await {
                return self.abort(surface, error).await;
            }
            self.attached.push(action);
        }

        let mut deadline = Instant::now() + self.config.timeout;
        loop {
            self.state = SessionState::AwaitingEvent;
            match self.next_wake(inbox, deadline).await {
                Wake::TimedOut => {
                    debug!(%surface, "session timed out");
                    self.stop(surface, false).await;
                    return Ok(SessionEnd::TimedOut);
                }
                Wake::Disconnected => {
                    self.stop(surface, false).await;
                    return Ok(SessionEnd::Disconnected);
                }
                Wake::ReturnFromHelp => {
                    if let Err(error) = self.show_page(surface, self.current_page).await {
                        return self.abort(surface, error).await;
                    }
                }
                Wake::Action(action) => {
                    debug!(%surface, ?action, page = self.current_page, "applying action");
                    self.state = SessionState::Applying(action);
                    if let Err(error) = self.apply(surface, action, inbox).await {
                        return self.abort(surface, error).await;
                    }
                    if action == NavAction::Stop {
                        return Ok(SessionEnd::Stopped);
                    }
                    // The wait restarts only once the action, prompt included, is done.
                    deadline = Instant::now() + self.config.timeout;
                }
            }
        }
    }

    /// Race the asserted and retracted trigger feeds against the deadline.
    ///
    /// The losing wait is dropped before it takes anything off its feed, so
    /// its event stays queued for the next iteration.
    async fn next_wake(&mut self, inbox: &mut Inbox, deadline: Instant) -> Wake {
        tokio::select! {
            added = timeout_at(deadline, next_action(&mut inbox.added)) => classify(added),
            removed = timeout_at(deadline, next_action(&mut inbox.removed)) => classify(removed),
            Some(()) = self.help_rx.recv() => Wake::ReturnFromHelp,
        }
    }

    async fn apply(
        &mut self,
        surface: SurfaceId,
        action: NavAction,
        inbox: &mut Inbox,
    ) -> Result<(), ChatError> {
        if action != NavAction::Help {
            self.cancel_help_timer();
        }
        match action {
            NavAction::First | NavAction::Previous | NavAction::Next | NavAction::Last => {
                if let Some(page) = self.target_page(action) {
                    self.show_page(surface, page).await?;
                }
            }
            NavAction::Jump => self.jump(surface, inbox).await?,
            NavAction::Stop => self.stop(surface, true).await,
            NavAction::Help => self.show_help(surface).await?,
        }
        Ok(())
    }

    async fn show_page(&mut self, surface: SurfaceId, page: usize) -> Result<(), ChatError> {
        self.state = SessionState::Rendering { first: false };
        let render = self
            .pages
            .render(page, false, self.paginating, &self.config.style);
        self.client.edit(surface, &render).await?;
        self.current_page = page;
        Ok(())
    }

    async fn jump(&mut self, surface: SurfaceId, inbox: &mut Inbox) -> Result<(), ChatError> {
        let asked = prompt::ask_page(
            &*self.client,
            self.channel,
            &mut inbox.messages,
            self.maximum_pages(),
            self.config.prompt_timeout,
            self.config.notice_linger,
        )
        .await;

        match asked {
            Ok((JumpOutcome::Jumped(page), _)) => self.show_page(surface, page).await,
            Ok((outcome, _)) => {
                debug!(?outcome, page = self.current_page, "jump abandoned");
                Ok(())
            }
            Err(error) => {
                warn!(%error, "jump prompt could not be posted");
                Ok(())
            }
        }
    }

    async fn show_help(&mut self, surface: SurfaceId) -> Result<(), ChatError> {
        let render = self
            .pages
            .help_render(self.current_page, &self.config.style);
        self.client.edit(surface, &render).await?;

        self.cancel_help_timer();
        let tx = self.help_tx.clone();
        let delay = self.config.help_return_delay;
        self.help_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(()).await;
        }));
        Ok(())
    }

    fn cancel_help_timer(&mut self) {
        if let Some(timer) = self.help_timer.take() {
            timer.abort();
        }
        while self.help_rx.try_recv().is_ok() {}
    }

    /// Leave the surface without controls. Calling it again is a no-op.
    ///
    /// `explicit` is true when the owner asked to stop; only then does
    /// `stop_deletes` remove the surface. Failures are logged and swallowed.
    async fn stop(&mut self, surface: SurfaceId, explicit: bool) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.state = SessionState::Stopped;
        self.paginating = false;
        self.cancel_help_timer();

        if explicit && self.config.stop_deletes {
            if let Err(error) = self.client.delete(surface).await {
                debug!(%surface, %error, "surface delete failed on stop");
            }
            return;
        }

        match self.client.clear_triggers(surface).await {
            Ok(()) => {}
            Err(ChatError::Forbidden) => {
                for action in &self.attached {
                    match self.client.remove_trigger(surface, action.symbol()).await {
                        Ok(()) => {}
                        Err(ChatError::NotFound) => break,
                        Err(error) => debug!(%surface, %error, "trigger removal failed"),
                    }
                }
            }
            Err(error) => debug!(%surface, %error, "clearing triggers failed on stop"),
        }
    }

    /// End the session after a failed render.
    async fn abort(
        &mut self,
        surface: SurfaceId,
        error: ChatError,
    ) -> Result<SessionEnd, SessionError> {
        if error == ChatError::NotFound {
            debug!(%surface, "surface gone");
            self.state = SessionState::Stopped;
            self.paginating = false;
            self.cancel_help_timer();
            return Ok(SessionEnd::SurfaceGone);
        }
        warn!(%surface, %error, "render failed, stopping session");
        self.stop(surface, false).await;
        Err(SessionError::Render(error))
    }
}

impl Drop for PagedSession {
    fn drop(&mut self) {
        if let Some(timer) = self.help_timer.take() {
            timer.abort();
        }
    }
}

/// Wait for the next trigger on `feed` that maps to a navigation action.
async fn next_action(feed: &mut mpsc::Receiver<TriggerEvent>) -> Option<NavAction> {
    while let Some(event) = feed.recv().await {
        if let Some(action) = NavAction::from_symbol(&event.symbol) {
            return Some(action);
        }
    }
    None
}

fn classify(result: Result<Option<NavAction>, Elapsed>) -> Wake {
    match result {
        Ok(Some(action)) => Wake::Action(action),
        Ok(None) => Wake::Disconnected,
        Err(_) => Wake::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatEvent;
    use crate::chat::mock::MockChat;

    fn session(entries: usize, per_page: usize) -> PagedSession {
        let items: Vec<String> = (1..=entries).map(|i| format!("item {i}")).collect();
        PagedSession::new(
            Arc::new(MockChat::new()),
            Arc::new(SessionRegistry::new()),
            1,
            10,
            Pages::list(items, per_page),
        )
    }

    fn trigger(surface: SurfaceId, action: NavAction) -> TriggerEvent {
        TriggerEvent {
            surface,
            user: 1,
            symbol: action.symbol().to_string(),
        }
    }

    #[test]
    fn paginating_iff_more_than_one_page() {
        assert!(session(25, 9).paginating());
        assert!(!session(9, 9).paginating());
        assert!(!session(0, 9).paginating());
        assert_eq!(session(25, 9).maximum_pages(), 3);
    }

    #[test]
    fn target_page_is_bounds_checked() {
        let mut s = session(25, 9);
        assert_eq!(s.target_page(NavAction::Previous), None);
        assert_eq!(s.target_page(NavAction::Next), Some(2));
        assert_eq!(s.target_page(NavAction::Last), Some(3));
        s.current_page = 3;
        assert_eq!(s.target_page(NavAction::Next), None);
        assert_eq!(s.target_page(NavAction::First), Some(1));
        assert_eq!(s.target_page(NavAction::Help), None);
    }

    #[test]
    fn permission_requirements_depend_on_mode() {
        let interactive = session(25, 9);
        let no_reactions = Permissions::all().without(Capability::AddReactions);
        assert_eq!(
            interactive.missing_capability(no_reactions),
            Some(Capability::AddReactions)
        );

        let single = session(3, 9);
        assert_eq!(single.missing_capability(no_reactions), None);
        assert_eq!(
            single.missing_capability(Permissions::all().without(Capability::EmbedLinks)),
            Some(Capability::EmbedLinks)
        );

        let text = PagedSession::new(
            Arc::new(MockChat::new()),
            Arc::new(SessionRegistry::new()),
            1,
            10,
            Pages::text("short", "```", "```", 100),
        );
        assert_eq!(
            text.missing_capability(Permissions::all().without(Capability::EmbedLinks)),
            None
        );
    }

    #[tokio::test]
    async fn race_takes_one_branch_and_leaves_the_other_queued() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = SurfaceId::new(10, 500);
        let (_guard, mut inbox) = registry.register(surface, 1).unwrap();
        let mut s = session(25, 9);

        registry.route(&ChatEvent::TriggerAdded(trigger(surface, NavAction::Next)));
        registry.route(&ChatEvent::TriggerRemoved(trigger(surface, NavAction::Last)));

        let deadline = Instant::now() + Duration::from_secs(120);
        let first = match s.next_wake(&mut inbox, deadline).await {
            Wake::Action(action) => action,
            _ => panic!("expected an action"),
        };
        assert!(first == NavAction::Next || first == NavAction::Last);
        assert_eq!(s.current_page(), 1);

        let leftover = if first == NavAction::Next {
            inbox.removed.try_recv().unwrap()
        } else {
            inbox.added.try_recv().unwrap()
        };
        assert_ne!(NavAction::from_symbol(&leftover.symbol), Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn race_times_out_when_both_feeds_are_silent() {
        let registry = Arc::new(SessionRegistry::new());
        let (_guard, mut inbox) = registry.register(SurfaceId::new(10, 500), 1).unwrap();
        let mut s = session(25, 9);

        let deadline = Instant::now() + Duration::from_secs(120);
        assert!(matches!(
            s.next_wake(&mut inbox, deadline).await,
            Wake::TimedOut
        ));
    }

    #[tokio::test]
    async fn unknown_symbols_do_not_win_the_race() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = SurfaceId::new(10, 500);
        let (_guard, mut inbox) = registry.register(surface, 1).unwrap();
        let mut s = session(25, 9);

        registry.route(&ChatEvent::TriggerAdded(TriggerEvent {
            surface,
            user: 1,
            symbol: "\u{1f44d}".to_string(),
        }));
        registry.route(&ChatEvent::TriggerAdded(trigger(surface, NavAction::Stop)));

        let deadline = Instant::now() + Duration::from_secs(120);
        assert!(matches!(
            s.next_wake(&mut inbox, deadline).await,
            Wake::Action(NavAction::Stop)
        ));
    }
}
