use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use katbot::chat::mock::{ChatCall, MockChat};
use katbot::chat::{
    Capability, ChannelId, ChatEvent, IncomingMessage, MessageId, Permissions, SurfaceId,
    TriggerEvent, UserId,
};
use katbot::consts::{HELP_HINT, JUMP_QUESTION, permission_notice};
use katbot::events::EventBus;
use katbot::session::{
    NavAction, PageStyle, PagedSession, Pages, Routed, SessionConfig, SessionEnd, SessionError,
    SessionRegistry, SessionReport,
};

const CHANNEL: ChannelId = 10;
const OWNER: UserId = 1;
const SURFACE: SurfaceId = SurfaceId {
    channel: CHANNEL,
    message: MockChat::FIRST_MESSAGE_ID,
};

type Running = JoinHandle<Result<SessionReport, SessionError>>;

fn items(count: usize) -> Pages {
    Pages::list((1..=count).map(|i| format!("item {i}")), 9)
}

fn quick_config() -> SessionConfig {
    SessionConfig {
        notice_linger: Duration::ZERO,
        ..SessionConfig::default()
    }
}

fn start(
    chat: &Arc<MockChat>,
    registry: &Arc<SessionRegistry>,
    pages: Pages,
    config: SessionConfig,
) -> Running {
    let session = PagedSession::new(
        chat.clone(),
        Arc::clone(registry),
        OWNER,
        CHANNEL,
        pages,
    )
    .with_config(config);
    tokio::spawn(session.run())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

fn press(registry: &SessionRegistry, surface: SurfaceId, user: UserId, action: NavAction) -> Routed {
    registry.route(&ChatEvent::TriggerAdded(TriggerEvent {
        surface,
        user,
        symbol: action.symbol().to_string(),
    }))
}

fn release(registry: &SessionRegistry, surface: SurfaceId, action: NavAction) -> Routed {
    registry.route(&ChatEvent::TriggerRemoved(TriggerEvent {
        surface,
        user: OWNER,
        symbol: action.symbol().to_string(),
    }))
}

fn type_message(registry: &SessionRegistry, id: MessageId, content: &str) -> Routed {
    registry.route(&ChatEvent::MessageCreated(IncomingMessage {
        channel: CHANNEL,
        id,
        author: OWNER,
        content: content.to_string(),
    }))
}

fn footer(render: &katbot::chat::Render) -> Option<String> {
    render.embed.as_ref().and_then(|embed| embed.footer.clone())
}

#[tokio::test]
async fn next_stops_at_the_last_page() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    for _ in 0..4 {
        assert_eq!(press(&registry, SURFACE, OWNER, NavAction::Next), Routed::Delivered(1));
    }
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::Stopped);
    assert_eq!(report.final_page, 3);
    assert_eq!(report.maximum_pages, 3);

    let edits = chat.edits(SURFACE);
    assert_eq!(edits.len(), 2, "the third and fourth Next change nothing");
    assert_eq!(footer(&edits[0]).as_deref(), Some("Page 2/3 (25 entries)"));
    assert_eq!(footer(&edits[1]).as_deref(), Some("Page 3/3 (25 entries)"));
    assert_eq!(
        chat.count(|call| matches!(call, ChatCall::ClearTriggers { .. })),
        1
    );
    assert!(registry.is_empty());
}

#[tokio::test]
async fn first_render_carries_the_hint_and_all_triggers() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| chat.triggers_added(SURFACE).len() == 7).await;
    press(&registry, SURFACE, OWNER, NavAction::Stop);
    running.await.unwrap().unwrap();

    let sent = chat.sent_to(CHANNEL);
    assert_eq!(sent.len(), 1);
    let description = sent[0].1.embed.as_ref().unwrap().description.clone().unwrap();
    assert!(description.starts_with("1. item 1\n"));
    assert!(description.ends_with(HELP_HINT));

    let expected: Vec<String> = NavAction::attached_for(3)
        .into_iter()
        .map(|action| action.symbol().to_string())
        .collect();
    assert_eq!(chat.triggers_added(SURFACE), expected);
}

#[tokio::test]
async fn two_pages_skip_first_and_last_triggers() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(12), quick_config());

    wait_until(|| chat.triggers_added(SURFACE).len() == 5).await;
    // Still honoured when asserted by hand.
    press(&registry, SURFACE, OWNER, NavAction::Last);
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.final_page, 2);
    let attached = chat.triggers_added(SURFACE);
    assert!(!attached.contains(&NavAction::First.symbol().to_string()));
    assert!(!attached.contains(&NavAction::Last.symbol().to_string()));
}

#[tokio::test]
async fn retracted_triggers_navigate_too() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    release(&registry, SURFACE, NavAction::Last);
    wait_until(|| chat.edits(SURFACE).len() == 1).await;
    release(&registry, SURFACE, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::Stopped);
    assert_eq!(report.final_page, 3);
}

#[tokio::test]
async fn other_users_cannot_drive_the_session() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    assert_eq!(press(&registry, SURFACE, 2, NavAction::Next), Routed::NotOwner);
    assert_eq!(press(&registry, SURFACE, 2, NavAction::Stop), Routed::NotOwner);
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.final_page, 1);
    assert!(chat.edits(SURFACE).is_empty());
}

#[tokio::test]
async fn missing_permission_redirects_with_one_notice() {
    let chat = Arc::new(
        MockChat::new()
            .with_permissions(Permissions::all().without(Capability::AddReactions))
            .with_private_channel(99),
    );
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    let private_surface = SurfaceId::new(99, MockChat::FIRST_MESSAGE_ID + 1);
    wait_until(|| registry.lookup(private_surface).is_some()).await;
    press(&registry, private_surface, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.channel, 99);
    assert_eq!(report.surface, Some(private_surface));

    let notices = chat.sent_to(CHANNEL);
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].1.content.as_deref(),
        Some(permission_notice("add reactions").as_str())
    );
    assert_eq!(chat.sent_to(99).len(), 1);
}

#[tokio::test]
async fn missing_permission_without_private_channel_fails() {
    let chat = Arc::new(
        MockChat::new().with_permissions(Permissions::all().without(Capability::EmbedLinks)),
    );
    let registry = Arc::new(SessionRegistry::new());

    let err = start(&chat, &registry, items(3), quick_config())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::PermissionDenied {
            missing: Capability::EmbedLinks
        }
    ));
    assert_eq!(chat.sent_to(CHANNEL).len(), 1, "only the notice");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn single_page_renders_once_without_registering() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());

    let report = start(&chat, &registry, items(5), quick_config())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.end, SessionEnd::Rendered);
    assert_eq!(report.maximum_pages, 1);
    assert!(registry.is_empty());
    assert!(chat.triggers_added(SURFACE).is_empty());

    let sent = chat.sent_to(CHANNEL);
    let embed = sent[0].1.embed.clone().unwrap();
    assert_eq!(embed.footer, None);
    assert!(!embed.description.unwrap().contains(HELP_HINT));
}

#[tokio::test]
async fn jump_to_a_valid_page() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Jump);
    wait_until(|| chat.sent_to(CHANNEL).len() == 2).await;
    assert_eq!(type_message(&registry, 555, "3"), Routed::Delivered(1));
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.final_page, 3);

    let question = MockChat::FIRST_MESSAGE_ID + 1;
    assert!(chat.calls().contains(&ChatCall::DeleteMessages {
        channel: CHANNEL,
        messages: vec![question, 555],
    }));
}

#[tokio::test]
async fn jump_out_of_range_keeps_the_page_and_cleans_up() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Jump);
    wait_until(|| {
        chat.sent_to(CHANNEL)
            .iter()
            .any(|(_, render)| render.content.as_deref() == Some(JUMP_QUESTION))
    })
    .await;
    type_message(&registry, 555, "7");
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.final_page, 1);
    assert!(chat.edits(SURFACE).is_empty());

    let sent = chat.sent_to(CHANNEL);
    assert_eq!(
        sent[2].1.content.as_deref(),
        Some("That page does not exist. (7/3)")
    );
    let question = MockChat::FIRST_MESSAGE_ID + 1;
    let notice = MockChat::FIRST_MESSAGE_ID + 2;
    assert!(chat.calls().contains(&ChatCall::DeleteMessages {
        channel: CHANNEL,
        messages: vec![question, 555, notice],
    }));
}

#[tokio::test(start_paused = true)]
async fn jump_prompt_times_out() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), SessionConfig::default());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Jump);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.final_page, 1);
    assert_eq!(report.end, SessionEnd::TimedOut);

    let sent = chat.sent_to(CHANNEL);
    assert_eq!(sent[2].1.content.as_deref(), Some("You took too long."));
    assert!(chat.calls().contains(&ChatCall::DeleteMessages {
        channel: CHANNEL,
        messages: vec![MockChat::FIRST_MESSAGE_ID + 1, MockChat::FIRST_MESSAGE_ID + 2],
    }));
}

#[tokio::test(start_paused = true)]
async fn slow_jump_answer_does_not_shorten_the_next_wait() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Jump);
    wait_until(|| chat.sent_to(CHANNEL).len() == 2).await;

    tokio::time::sleep(Duration::from_secs(29)).await;
    type_message(&registry, 555, "2");
    let answered = tokio::time::Instant::now();

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::TimedOut);
    assert_eq!(report.final_page, 2);
    assert!(
        answered.elapsed() >= Duration::from_secs(120),
        "waited only {:?} after the jump",
        answered.elapsed()
    );
}

#[tokio::test]
async fn stopping_twice_is_harmless() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Stop);
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::Stopped);
    assert_eq!(
        chat.count(|call| matches!(call, ChatCall::ClearTriggers { .. })),
        1
    );
    assert_eq!(press(&registry, SURFACE, OWNER, NavAction::Stop), Routed::NoSession);
}

#[tokio::test]
async fn stop_can_delete_the_surface() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let config = SessionConfig {
        stop_deletes: true,
        ..quick_config()
    };
    let running = start(&chat, &registry, items(25), config);

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    running.await.unwrap().unwrap();
    assert!(chat.calls().contains(&ChatCall::Delete { surface: SURFACE }));
    assert_eq!(
        chat.count(|call| matches!(call, ChatCall::ClearTriggers { .. })),
        0
    );
}

#[tokio::test]
async fn forbidden_clear_falls_back_to_removing_own_triggers() {
    let chat = Arc::new(MockChat::new().forbid_clear_triggers());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Stop);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::Stopped);
    assert_eq!(
        chat.count(|call| matches!(call, ChatCall::RemoveTrigger { .. })),
        7
    );
}

#[tokio::test(start_paused = true)]
async fn silence_times_out_and_leaves_the_page() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let config = SessionConfig {
        stop_deletes: true,
        ..SessionConfig::default()
    };

    let report = start(&chat, &registry, items(25), config)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.end, SessionEnd::TimedOut);
    assert!(registry.is_empty());
    assert_eq!(
        chat.count(|call| matches!(call, ChatCall::ClearTriggers { .. })),
        1
    );
    assert!(!chat.calls().contains(&ChatCall::Delete { surface: SURFACE }));
}

#[tokio::test]
async fn deleted_surface_ends_the_session() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| chat.triggers_added(SURFACE).len() == 7).await;
    chat.delete_externally(SURFACE.message);
    press(&registry, SURFACE, OWNER, NavAction::Next);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::SurfaceGone);
    assert_eq!(report.final_page, 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unregistering_from_outside_disconnects() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    assert!(registry.unregister(SURFACE));

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn help_returns_to_the_page_after_the_delay() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let pages = items(25);
    let running = start(&chat, &registry, pages.clone(), SessionConfig::default());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Next);
    press(&registry, SURFACE, OWNER, NavAction::Help);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::TimedOut);
    assert_eq!(report.final_page, 2);

    let edits = chat.edits(SURFACE);
    assert_eq!(edits.len(), 3);
    assert_eq!(
        footer(&edits[1]).as_deref(),
        Some("We were on page 2 before this message.")
    );
    assert_eq!(edits[2], pages.render(2, false, true, &PageStyle::default()));
}

#[tokio::test(start_paused = true)]
async fn another_action_cancels_the_help_return() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let running = start(&chat, &registry, items(25), SessionConfig::default());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Help);
    press(&registry, SURFACE, OWNER, NavAction::Last);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.end, SessionEnd::TimedOut);
    // Help, then the last page; nothing from the aborted timer.
    assert_eq!(chat.edits(SURFACE).len(), 2);
    assert_eq!(report.final_page, 3);
}

#[tokio::test]
async fn events_flow_from_the_bus() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let bus = EventBus::default();
    let dispatcher = tokio::spawn(Arc::clone(&registry).dispatch(bus.subscribe()));
    let running = start(&chat, &registry, items(25), quick_config());

    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    for action in [NavAction::Last, NavAction::Previous, NavAction::Stop] {
        bus.emit(ChatEvent::TriggerAdded(TriggerEvent {
            surface: SURFACE,
            user: OWNER,
            symbol: action.symbol().to_string(),
        }));
    }

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.final_page, 2);
    dispatcher.abort();
}

#[tokio::test]
async fn text_pages_render_as_plain_content() {
    let chat = Arc::new(MockChat::new());
    let registry = Arc::new(SessionRegistry::new());
    let text = (0..40)
        .map(|i| format!("line {i:02} with some padding"))
        .collect::<Vec<_>>()
        .join("\n");
    let pages = Pages::text(&text, "```", "```", 300);
    let maximum = pages.maximum_pages();
    assert!(maximum > 1);

    let running = start(&chat, &registry, pages, quick_config());
    wait_until(|| registry.lookup(SURFACE).is_some()).await;
    press(&registry, SURFACE, OWNER, NavAction::Stop);
    running.await.unwrap().unwrap();

    let sent = chat.sent_to(CHANNEL);
    let content = sent[0].1.content.clone().unwrap();
    assert!(sent[0].1.embed.is_none());
    assert!(content.starts_with("```\nline 00"));
    assert!(content.ends_with(&format!("```\nPage 1/{maximum}")));
    assert!(content.chars().count() <= 300 + format!("\nPage 1/{maximum}").len());
}
