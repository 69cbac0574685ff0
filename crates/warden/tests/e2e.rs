// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end integration tests for the complete Warden pipeline.
//!
//! Each test builds an isolated TestHarness (temp SQLite, manual clock,
//! mock directory, recording sink) with real features registered on the
//! real dispatcher, scheduler, and executor. Tests are independent and
//! order-insensitive.

use std::sync::Arc;
use std::time::Duration;

use warden_core::event::{Emoji, InteractionKind};
use warden_core::traits::gateway::{Member, MessageMeta};
use warden_core::{
    Action, ChannelId, Clock, Event, EventBody, GatewayDirectory, MessageId, Permission, RoleId,
    Store, TenantId, UserId,
};
use warden_features::{
    antinuke, antiraid, board, bumper, feeds, filters, levels, tickets, AntiNuke, AntiRaid,
    Board, BumpReminder, FeatureContext, Feeds, Filters, Levels, Snipe, Tickets,
};
use warden_test_utils::{HarnessCore, TestHarness};

const TENANT: TenantId = TenantId(1000);

fn ctx_from(core: &HarnessCore) -> FeatureContext {
    FeatureContext {
        store: core.store.clone() as Arc<dyn Store>,
        config: core.config_cache.clone(),
        scheduler: core.scheduler.clone(),
        rate: core.rate.clone(),
        clock: core.clock.clone() as Arc<dyn Clock>,
        directory: core.directory.clone() as Arc<dyn GatewayDirectory>,
    }
}

/// Pinned XP roll used by the level scenarios.
struct FixedXp(u32);

impl levels::XpSource for FixedXp {
    fn roll(&self) -> u32 {
        self.0
    }
}

// ---- Scenario 1: AntiNuke ban cascade ----

#[tokio::test]
async fn antinuke_ban_cascade() {
    let harness = TestHarness::builder()
        .build(|core| vec![Arc::new(AntiNuke::new(ctx_from(core)))])
        .await;

    harness
        .config_cache
        .put(
            TENANT,
            antinuke::NAMESPACE,
            &antinuke::AntiNukeSettings {
                modules: [(antinuke::AdminActionKind::Ban, 3)].into_iter().collect(),
                timeframe_secs: 10,
                whitelist_users: Vec::new(),
                whitelist_bots: Vec::new(),
                admins: Vec::new(),
                punishment: antinuke::Punishment::Ban,
                monitored_permissions: Vec::new(),
                alert_channel: Some(ChannelId(1)),
            },
        )
        .await
        .unwrap();

    let actor = UserId(50);
    let ban = |target: u64| {
        Event::new(TENANT, EventBody::MemberBanned { target: UserId(target), actor })
    };

    // t=0, t=2: under threshold.
    harness.process(ban(100)).await;
    harness.clock.advance(Duration::from_secs(2));
    harness.process(ban(101)).await;
    assert!(harness.actions().is_empty());

    // t=4: third ban -> one BanMember(actor) and one alert.
    harness.clock.advance(Duration::from_secs(2));
    harness.process(ban(102)).await;
    assert_eq!(harness.actions().len(), 2);
    let bans = harness.sink.performed_where(|a| matches!(a, Action::BanMember { .. }));
    assert_eq!(bans.len(), 1);
    assert!(matches!(bans[0].action, Action::BanMember { user } if user == actor));
    let alerts = harness.sink.performed_where(|a| matches!(a, Action::SendMessage { .. }));
    assert_eq!(alerts.len(), 1);
    assert!(matches!(&alerts[0].action, Action::SendMessage { channel, .. } if *channel == ChannelId(1)));

    // t=6: another ban inside the idempotency window -> no new action.
    harness.clock.advance(Duration::from_secs(2));
    harness.process(ban(103)).await;
    assert_eq!(harness.actions().len(), 2);
}

// ---- Scenario 2: Level-up ----

#[tokio::test]
async fn level_up_fires_exactly_at_400_xp() {
    let mut levels_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let levels =
                Arc::new(Levels::with_xp_source(ctx_from(core), Box::new(FixedXp(20))));
            levels_handle = Some(levels.clone());
            vec![levels]
        })
        .await;
    let levels = levels_handle.unwrap();

    harness
        .config_cache
        .put(
            TENANT,
            levels::NAMESPACE,
            &levels::LevelsSettings {
                rate_multiplier: 1.0,
                announce: levels::AnnounceMode::Channel,
                template: "{user} reached level {level}!".into(),
                stack_rewards: true,
            },
        )
        .await
        .unwrap();
    harness.directory.add_simple_member(TENANT, UserId(70), "climber");

    let message = |n: u64| {
        Event::new(
            TENANT,
            EventBody::MessageCreate {
                channel: ChannelId(2),
                message: MessageId(n),
                author: UserId(70),
                content: "hi".into(),
                attachments: Vec::new(),
                mentions: Vec::new(),
                author_is_bot: false,
            },
        )
    };

    // Start at xp=95 with four messages already counted; the next message
    // awards 20 -> 115, still level 1.
    levels.set_xp(TENANT, UserId(70), 95).await.unwrap();
    let mut progress = levels.progress(TENANT, UserId(70)).await.unwrap().unwrap();
    progress.messages_since_last_award = 4;
    harness
        .store
        .put(
            TENANT,
            levels::PROGRESS_NAMESPACE,
            &UserId(70).to_string(),
            &serde_json::to_string(&progress).unwrap(),
        )
        .await
        .unwrap();

    harness.process(message(1)).await;
    let progress = levels.progress(TENANT, UserId(70)).await.unwrap().unwrap();
    assert_eq!(progress.xp, 115);
    assert_eq!(progress.level, 1);
    assert!(harness.actions().is_empty(), "no level-up at 115 xp");

    // Keep sending; every 5th message adds 20. 115 -> 215 -> ... -> 395:
    // all level 1. The award crossing 400 announces exactly once.
    let mut n = 2;
    while levels.progress(TENANT, UserId(70)).await.unwrap().unwrap().xp < 400 {
        harness.process(message(n)).await;
        n += 1;
    }
    let progress = levels.progress(TENANT, UserId(70)).await.unwrap().unwrap();
    assert_eq!(progress.xp, 415);
    assert_eq!(progress.level, 2);

    let announcements: Vec<_> = harness
        .sink
        .performed_where(|a| matches!(a, Action::SendMessage { .. }));
    assert_eq!(announcements.len(), 1);
    let Action::SendMessage { content, .. } = &announcements[0].action else { unreachable!() };
    assert_eq!(content, &format!("<@{}> reached level 2!", UserId(70)));
}

#[tokio::test]
async fn level_up_at_exactly_400_with_fixed_grants() {
    let mut levels_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let levels =
                Arc::new(Levels::with_xp_source(ctx_from(core), Box::new(FixedXp(20))));
            levels_handle = Some(levels.clone());
            vec![levels]
        })
        .await;
    let levels = levels_handle.unwrap();

    harness
        .config_cache
        .put(TENANT, levels::NAMESPACE, &levels::LevelsSettings {
            rate_multiplier: 1.0,
            announce: levels::AnnounceMode::Channel,
            template: "{user} reached level {level}!".into(),
            stack_rewards: true,
        })
        .await
        .unwrap();
    harness.directory.add_simple_member(TENANT, UserId(71), "exact");

    // 380 + 20 = exactly 400 -> level 2.
    levels.set_xp(TENANT, UserId(71), 380).await.unwrap();
    for n in 0..5u64 {
        harness
            .process(Event::new(
                TENANT,
                EventBody::MessageCreate {
                    channel: ChannelId(2),
                    message: MessageId(500 + n),
                    author: UserId(71),
                    content: "hey".into(),
                    attachments: Vec::new(),
                    mentions: Vec::new(),
                    author_is_bot: false,
                },
            ))
            .await;
    }

    let progress = levels.progress(TENANT, UserId(71)).await.unwrap().unwrap();
    assert_eq!(progress.xp, 400);
    assert_eq!(progress.level, 2);
    assert_eq!(harness.actions().len(), 1, "one announcement");
}

// ---- Scenario 3: Mass-join lockdown ----

#[tokio::test]
async fn mass_join_lockdown_and_auto_release() {
    let mut antiraid_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let feature = Arc::new(AntiRaid::new(ctx_from(core)));
            antiraid_handle = Some(feature.clone());
            vec![feature]
        })
        .await;
    let antiraid = antiraid_handle.unwrap();

    harness
        .config_cache
        .put(
            TENANT,
            antiraid::NAMESPACE,
            &antiraid::AntiRaidSettings {
                min_account_age_days: None,
                new_account_action: antiraid::FilterAction::Kick,
                require_avatar: false,
                no_avatar_action: antiraid::FilterAction::Kick,
                join_threshold: Some(5),
                join_window_secs: 10,
                timeout_minutes: 60,
                alert_channel: None,
            },
        )
        .await
        .unwrap();

    let join = |harness: &TestHarness, user: u64| {
        Event::new(
            TENANT,
            EventBody::MemberJoin {
                user: UserId(user),
                account_created_at: harness.clock.wall() - chrono::Duration::days(365),
                has_avatar: true,
                is_bot: false,
            },
        )
    };

    // Five joins at t=0..4 engage raid state at join #5.
    for n in 1..=5u64 {
        harness.process(join(&harness, n)).await;
        harness.clock.advance(Duration::from_secs(1));
    }
    let state = antiraid.raid_state(TENANT).await.unwrap().unwrap();
    assert!(state.active);
    assert!(!state.reason.is_empty());

    // Joins while active are kicked.
    harness.process(join(&harness, 6)).await;
    let kicks = harness.sink.performed_where(|a| matches!(a, Action::KickMember { .. }));
    assert_eq!(kicks.len(), 1);
    assert!(matches!(kicks[0].action, Action::KickMember { user } if user == UserId(6)));

    // Thirty-one minutes later the release task flips the state back.
    harness.advance(Duration::from_secs(31 * 60)).await;
    assert!(!antiraid.raid_state(TENANT).await.unwrap().unwrap().active);

    harness.process(join(&harness, 7)).await;
    let kicks = harness.sink.performed_where(|a| matches!(a, Action::KickMember { .. }));
    assert_eq!(kicks.len(), 1, "no kick after release");
}

// ---- Scenario 4: Starboard under removal ----

#[tokio::test]
async fn starboard_delete_and_fresh_recreate() {
    let mut board_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let feature = Arc::new(Board::starboard(ctx_from(core)));
            board_handle = Some(feature.clone());
            vec![feature]
        })
        .await;
    let starboard = board_handle.unwrap();

    let star = Emoji::unicode("⭐");
    let source_channel = ChannelId(10);
    let board_channel = ChannelId(11);
    let source = MessageId(600);
    let author = UserId(90);

    harness
        .config_cache
        .put(
            TENANT,
            "starboard.config",
            &board::BoardSettings {
                channel: board_channel,
                emoji: star.clone(),
                threshold: 3,
                allow_self_react: true,
                locked: false,
                ignored_channels: Vec::new(),
                ignored_members: Vec::new(),
                ignored_roles: Vec::new(),
                show_attachments: true,
                show_timestamp: true,
                show_jump_link: true,
                color: 0xFFD700,
            },
        )
        .await
        .unwrap();
    harness.directory.add_message(
        TENANT,
        MessageMeta {
            channel: source_channel,
            message: source,
            author,
            author_is_bot: false,
            content: "starworthy".into(),
            attachments: Vec::new(),
            pinned: false,
        },
    );

    let react = |user: u64| {
        Event::new(
            TENANT,
            EventBody::ReactionAdd {
                channel: source_channel,
                message: source,
                emoji: star.clone(),
                user: UserId(user),
            },
        )
    };
    let unreact = |user: u64| {
        Event::new(
            TENANT,
            EventBody::ReactionRemove {
                channel: source_channel,
                message: source,
                emoji: star.clone(),
                user: UserId(user),
            },
        )
    };

    // Three adds create the entry; the executor back-fills the message id.
    for user in 1..=3u64 {
        harness.directory.react(TENANT, source_channel, source, &star, UserId(user));
        harness.process(react(user)).await;
    }
    let entry = starboard.entry(TENANT, source).await.unwrap().unwrap();
    let first_board_message = entry.board_message_id.expect("back-filled by executor");
    assert_eq!(entry.star_count, 3);

    // Two removals drop the count to 1: board message and mapping deleted.
    harness.directory.unreact(TENANT, source_channel, source, &star, UserId(1));
    harness.process(unreact(1)).await;
    harness.directory.unreact(TENANT, source_channel, source, &star, UserId(2));
    harness.process(unreact(2)).await;

    assert!(starboard.entry(TENANT, source).await.unwrap().is_none());
    let deletes = harness.sink.performed_where(|a| matches!(a, Action::DeleteMessage { .. }));
    assert_eq!(deletes.len(), 1);
    assert!(matches!(
        deletes[0].action,
        Action::DeleteMessage { message, .. } if message == first_board_message
    ));

    // Re-adds back to 3: a brand-new board message, not a resurrection.
    for user in [1u64, 2] {
        harness.directory.react(TENANT, source_channel, source, &star, UserId(user));
        harness.process(react(user)).await;
    }
    let entry = starboard.entry(TENANT, source).await.unwrap().unwrap();
    let second_board_message = entry.board_message_id.expect("second back-fill");
    assert_ne!(second_board_message, first_board_message);
}

// ---- Scenario 5: Filter invite + exempt role ----

#[tokio::test]
async fn invite_filter_respects_exempt_role_until_lost() {
    let mut filters_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let feature = Arc::new(Filters::new(ctx_from(core)));
            filters_handle = Some(feature.clone());
            vec![feature]
        })
        .await;
    let filters = filters_handle.unwrap();

    let channel = ChannelId(30);
    let author = UserId(95);

    harness
        .config_cache
        .put(
            TENANT,
            filters::NAMESPACE,
            &filters::FiltersSettings {
                exempt_roles: vec![RoleId(5)],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    filters
        .set_channel_filters(TENANT, channel, [filters::FilterKind::Invites].into_iter().collect())
        .await
        .unwrap();

    let invite_message = |n: u64| {
        Event::new(
            TENANT,
            EventBody::MessageCreate {
                channel,
                message: MessageId(n),
                author,
                content: "join discord.gg/abc".into(),
                attachments: Vec::new(),
                mentions: Vec::new(),
                author_is_bot: false,
            },
        )
    };

    // With the exempt role: no delete.
    harness.directory.add_member(
        TENANT,
        Member {
            user: author,
            username: "spammer".into(),
            roles: vec![RoleId(5)],
            is_bot: false,
            joined_at: chrono::Utc::now(),
            account_created_at: chrono::Utc::now(),
            has_avatar: true,
        },
    );
    harness.process(invite_message(1)).await;
    assert!(harness.actions().is_empty());

    // Role lost: delete + warning.
    harness.directory.add_simple_member(TENANT, author, "spammer");
    harness.process(invite_message(2)).await;
    let actions = harness.actions();
    assert_eq!(actions.len(), 2);
    assert!(matches!(actions[0].action, Action::DeleteMessage { message, .. } if message == MessageId(2)));
    let Action::SendMessage { .. } = &actions[1].action else {
        panic!("expected warning message");
    };

    // Five seconds later the warning is deleted via the scheduled task,
    // using the message id the executor recorded.
    harness.advance(Duration::from_secs(5)).await;
    let actions = harness.actions();
    assert_eq!(actions.len(), 3);
    let Action::DeleteMessage { message, .. } = &actions[2].action else {
        panic!("expected warning cleanup");
    };
    // RecordingSink assigns synthetic ids starting at 9_000_000.
    assert!(message.0 >= 9_000_000);
}

// ---- Scenario 6: Bump reminder cycle ----

#[tokio::test]
async fn bump_reminder_cycle_with_autolock() {
    let harness = TestHarness::builder()
        .build(|core| vec![Arc::new(BumpReminder::new(ctx_from(core))) as Arc<dyn warden_core::Feature>])
        .await;

    let channel = ChannelId(50);
    let bump_bot = UserId(999);

    harness
        .config_cache
        .put(
            TENANT,
            bumper::NAMESPACE,
            &bumper::BumperSettings {
                channel,
                bump_bot,
                success_marker: "Bump done".into(),
                interval_secs: 7200,
                reminder_message: "Time to bump!".into(),
                thank_you_message: "Thanks!".into(),
                autoclean: false,
                autolock: true,
            },
        )
        .await
        .unwrap();

    let bump = |n: u64| {
        Event::new(
            TENANT,
            EventBody::MessageCreate {
                channel,
                message: MessageId(n),
                author: bump_bot,
                content: "Bump done :thumbsup:".into(),
                attachments: Vec::new(),
                mentions: Vec::new(),
                author_is_bot: true,
            },
        )
    };

    let perms = |harness: &TestHarness| {
        harness.sink.performed_where(|a| matches!(a, Action::SetChannelPermissions { .. }))
    };
    let sends = |harness: &TestHarness| {
        harness.sink.performed_where(|a| matches!(a, Action::SendMessage { .. }))
    };

    // Successful bump at t=0: thanks + unlock.
    harness.process(bump(1)).await;
    assert_eq!(harness.actions().len(), 2);
    assert!(matches!(&sends(&harness)[0].action, Action::SendMessage { content, .. } if content == "Thanks!"));
    let Action::SetChannelPermissions { overwrite, .. } = &perms(&harness)[0].action else {
        unreachable!()
    };
    assert_eq!(overwrite.allow, vec![Permission::SendMessages]);

    // At t=2h the reminder fires and locks the channel.
    harness.advance(Duration::from_secs(7200)).await;
    assert_eq!(harness.actions().len(), 4);
    assert!(matches!(&sends(&harness)[1].action, Action::SendMessage { content, .. } if content == "Time to bump!"));
    let Action::SetChannelPermissions { overwrite, .. } = &perms(&harness)[1].action else {
        unreachable!()
    };
    assert_eq!(overwrite.deny, vec![Permission::SendMessages]);

    // Next successful bump restores permissions.
    harness.process(bump(2)).await;
    let all_perms = perms(&harness);
    let Action::SetChannelPermissions { overwrite, .. } = &all_perms[2].action else {
        unreachable!()
    };
    assert_eq!(overwrite.allow, vec![Permission::SendMessages]);
}

// ---- Cross-cutting: idempotency and ticket uniqueness ----

#[tokio::test]
async fn replayed_event_never_acts_twice() {
    let harness = TestHarness::builder()
        .build(|core| vec![Arc::new(Feeds::new(ctx_from(core))) as Arc<dyn warden_core::Feature>])
        .await;

    let store = harness.store.clone();
    store
        .put(
            TENANT,
            feeds::NAMESPACE,
            "feed-1",
            &serde_json::to_string(&feeds::FeedConfig {
                channel: ChannelId(8),
                template: "{title} {url}".into(),
            })
            .unwrap(),
        )
        .await
        .unwrap();

    let item = Event::new(
        TENANT,
        EventBody::FeedItemObserved {
            feed_id: "feed-1".into(),
            title: "post".into(),
            url: "https://feed.invalid/1".into(),
        },
    );

    harness.process(item.clone()).await;
    harness.process(item).await;

    // Same idempotency key on both emissions; the executor dropped the
    // duplicate.
    assert_eq!(harness.actions().len(), 1);
}

#[tokio::test]
async fn one_open_ticket_per_user_end_to_end() {
    let mut tickets_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let feature = Arc::new(Tickets::new(ctx_from(core)));
            tickets_handle = Some(feature.clone());
            vec![feature]
        })
        .await;
    let tickets = tickets_handle.unwrap();

    harness
        .config_cache
        .put(
            TENANT,
            tickets::NAMESPACE,
            &tickets::TicketSettings {
                category: None,
                support_role: RoleId(44),
                log_channel: Some(ChannelId(60)),
                panel_message: "Need help?".into(),
                closed_ttl_secs: 3600,
            },
        )
        .await
        .unwrap();

    let open = Event::new(
        TENANT,
        EventBody::Interaction {
            kind: InteractionKind::Button,
            user: UserId(33),
            channel: ChannelId(1),
            message: None,
            custom_id: tickets::OPEN_CUSTOM_ID.into(),
            values: Vec::new(),
        },
    );

    harness.process(open.clone()).await;
    // The executor created the channel and back-filled the record.
    let ticket = tickets.open_ticket(TENANT, UserId(33)).await.unwrap().unwrap();
    assert!(ticket.channel_id.is_some());

    // Second open attempt while one is open: refused, no new channel.
    harness.process(open).await;
    let creates = harness.sink.performed_where(|a| matches!(a, Action::CreateChannel { .. }));
    assert_eq!(creates.len(), 1);

    // Close: transcript to the log channel, channel deleted after grace.
    let close = Event::new(
        TENANT,
        EventBody::Interaction {
            kind: InteractionKind::Button,
            user: UserId(33),
            channel: ChannelId(1),
            message: None,
            custom_id: tickets::CLOSE_CUSTOM_ID.into(),
            values: Vec::new(),
        },
    );
    harness.process(close).await;
    assert!(tickets.open_ticket(TENANT, UserId(33)).await.unwrap().is_none());

    harness.advance(Duration::from_secs(11)).await;
    let channel_deletes =
        harness.sink.performed_where(|a| matches!(a, Action::DeleteChannel { .. }));
    assert_eq!(channel_deletes.len(), 1);
}

#[tokio::test]
async fn snipe_records_through_full_pipeline() {
    let mut snipe_handle = None;
    let harness = TestHarness::builder()
        .build(|core| {
            let feature = Arc::new(Snipe::new(ctx_from(core)));
            snipe_handle = Some(feature.clone());
            vec![feature]
        })
        .await;
    let snipe = snipe_handle.unwrap();

    harness
        .process(Event::new(
            TENANT,
            EventBody::MessageDelete {
                channel: ChannelId(40),
                message: MessageId(1),
                author: Some(UserId(1)),
                content: Some("oops".into()),
                attachments: Vec::new(),
            },
        ))
        .await;

    assert_eq!(snipe.deleted(TENANT, ChannelId(40), 1).unwrap().content, "oops");
    assert!(harness.actions().is_empty(), "snipe emits no actions");
}
