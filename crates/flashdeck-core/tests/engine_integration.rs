//! Integration tests for the engine loop.
//!
//! Each test drives a full engine on a virtual clock against recording
//! collaborators, then checks what reached the screen, the speakers and the
//! outbox.

mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Duration;
use common::{count, Clock, Shared};
use flashdeck_core::services::AudioChannel;
use flashdeck_core::{
    Command, DenyReason, Engine, Event, EventType, ResourceCounters, SurfaceRequest, VideoPhase,
};

/// Counters must mirror what is actually on screen, and flashes and bubbles
/// never share it.
fn check_arbiter(engine: &Engine, log: &Shared) {
    let log = log.borrow();
    let c = engine.counters();
    assert_eq!(c.active_flashes as usize, log.live_flashes().len());
    assert_eq!(c.active_bubbles as usize, log.live_bubbles().len());
    assert!(c.active_flashes <= engine.settings().limits.max_flashes);
    assert!(c.active_bubbles <= engine.settings().limits.max_bubbles);
    assert!(c.active_flashes == 0 || c.active_bubbles == 0);
}

// ============================================================================
// Flash
// ============================================================================

#[test]
fn test_flash_fires_and_cleans_up() {
    let mut settings = common::quiet_settings();
    settings.flash.enabled = true;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);

    let deadline = clock.now + Duration::seconds(60);
    let fired_at = loop {
        clock.run(&mut e, 0.05);
        check_arbiter(&e, &log);
        let fired = e
            .drain_events()
            .into_iter()
            .find(|ev| matches!(ev, Event::EffectFired { event: EventType::Flash, .. }));
        if let Some(ev) = fired {
            break ev.at();
        }
        assert!(clock.now < deadline, "flash never fired");
    };

    // Sound plays right away, images stagger in.
    {
        let log = log.borrow();
        assert!(log.ducked);
        assert!(log
            .played
            .iter()
            .any(|(p, ch)| p == &PathBuf::from("snd/chime.wav") && *ch == AudioChannel::Effect));
    }
    clock.run_with(&mut e, 2.0, |e, _| check_arbiter(e, &log));
    let shown = log
        .borrow()
        .created
        .iter()
        .filter(|r| matches!(r, SurfaceRequest::FlashImage { .. }))
        .count();
    assert!((1..=6).contains(&shown), "{shown} images");

    // Clip is 2 s: cleanup at +3 s, unduck at +3.5 s.
    let until = fired_at + Duration::milliseconds(3_600) - clock.now;
    clock.run_with(&mut e, until.num_milliseconds() as f64 / 1000.0, |e, _| {
        check_arbiter(e, &log)
    });
    assert!(log.borrow().live_flashes().is_empty());
    assert_eq!(e.counters().active_flashes, 0);
    assert!(!log.borrow().ducked);
    assert!(e.scheduler().pending(EventType::Flash).is_some());
}

#[test]
fn test_bubbles_hold_back_a_flash_until_popped() {
    let mut settings = common::quiet_settings();
    settings.bubbles.enabled = true;
    settings.player.level = 20;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);
    assert!(e.scheduler().pending(EventType::Bubble).is_some());

    assert!(e.trigger_event(EventType::Bubble, false, clock.now));
    assert_eq!(log.borrow().live_bubbles().len(), 1);

    assert!(e.trigger_event(EventType::Flash, false, clock.now));
    let events = e.drain_events();
    assert!(events.iter().any(|ev| matches!(
        ev,
        Event::EffectDenied {
            event: EventType::Flash,
            reason: DenyReason::Waiting,
            ..
        }
    )));
    assert!(e.counters().flash_waiting);

    // A waiting flash blocks new bubbles.
    clock.run(&mut e, 0.6);
    e.trigger_event(EventType::Bubble, false, clock.now);
    let events = e.drain_events();
    assert!(events.iter().any(|ev| matches!(
        ev,
        Event::EffectDenied {
            event: EventType::Bubble,
            reason: DenyReason::Arbiter,
            ..
        }
    )));
    assert!(log.borrow().live_flashes().is_empty());

    let bubble = log.borrow().live_bubbles()[0];
    let xp_before = e.progress().xp;
    assert!(e.bubble_resolved(bubble, true, clock.now));
    assert!(!e.bubble_resolved(bubble, true, clock.now));
    let events = e.drain_events();
    assert!(events
        .iter()
        .any(|ev| matches!(ev, Event::XpAwarded { amount, .. } if *amount == 10.0)));
    assert!(e.progress().xp > xp_before || e.progress().level > 20);

    clock.run_with(&mut e, 0.5, |e, _| check_arbiter(e, &log));
    let events = e.drain_events();
    assert_eq!(
        count(&events, |ev| matches!(
            ev,
            Event::EffectFired {
                event: EventType::Flash,
                ..
            }
        )),
        1
    );
    assert!(!log.borrow().live_flashes().is_empty());
    assert!(!e.counters().flash_waiting);
}

#[test]
fn test_missed_bubble_expires_and_releases_the_flash() {
    let mut settings = common::quiet_settings();
    settings.bubbles.enabled = true;
    settings.bubbles.lifespan_secs = 2.0;
    settings.player.level = 20;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);

    assert!(e.trigger_event(EventType::Bubble, false, clock.now));
    assert!(e.trigger_event(EventType::Flash, false, clock.now));
    assert!(e.counters().flash_waiting);
    e.drain_events();

    // Lifespan jitter keeps the miss within 1.4 .. 2.6 s.
    clock.run(&mut e, 1.3);
    assert_eq!(log.borrow().live_bubbles().len(), 1);
    assert!(e.counters().flash_waiting);

    clock.run_with(&mut e, 2.0, |e, _| check_arbiter(e, &log));
    assert!(log.borrow().live_bubbles().is_empty());
    assert_eq!(e.counters().active_bubbles, 0);
    assert!(!e.counters().flash_waiting);
    assert!(!log.borrow().live_flashes().is_empty());

    let events = e.drain_events();
    assert_eq!(
        count(&events, |ev| matches!(
            ev,
            Event::EffectFired {
                event: EventType::Flash,
                ..
            }
        )),
        1
    );
    // Missed, not popped.
    assert_eq!(
        count(&events, |ev| matches!(ev, Event::XpAwarded { amount, .. } if *amount == 10.0)),
        0
    );
}

#[test]
fn test_unattended_bubbles_never_starve_flashes() {
    let mut settings = common::quiet_settings();
    settings.flash.enabled = true;
    settings.bubbles.enabled = true;
    settings.player.level = 20;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);

    let mut waiting_since = None;
    let mut longest_wait = Duration::zero();
    clock.run_with(&mut e, 600.0, |e, now| {
        check_arbiter(e, &log);
        match (e.counters().flash_waiting, waiting_since) {
            (true, None) => waiting_since = Some(now),
            (false, Some(since)) => {
                longest_wait = longest_wait.max(now - since);
                waiting_since = None;
            }
            _ => {}
        }
    });

    let events = e.drain_events();
    let fired = |event: EventType| {
        count(&events, |ev| matches!(ev, Event::EffectFired { event: ev_type, .. } if *ev_type == event))
    };
    assert!(fired(EventType::Bubble) >= 3, "bubbles: {}", fired(EventType::Bubble));
    assert!(fired(EventType::Flash) >= 5, "flashes: {}", fired(EventType::Flash));
    // Nobody pops anything; waits end when the last bubble drifts off.
    assert!(longest_wait < Duration::seconds(30), "waited {longest_wait}");
    if let Some(since) = waiting_since {
        assert!(clock.now - since < Duration::seconds(30));
    }
}

#[test]
fn test_random_sessions_keep_counters_in_sync() {
    for seed in [1, 7, 99, 2024] {
        let mut settings = common::quiet_settings();
        settings.flash.enabled = true;
        settings.flash.freq_per_min = 6.0;
        settings.bubbles.enabled = true;
        settings.bubbles.freq_per_min = 10.0;
        settings.player.level = 20;
        let (services, log) = common::services(common::library(), 5.0);
        let mut e = Engine::new(settings, services, Some(seed));
        let mut clock = Clock::new();
        e.start(clock.now);

        let mut bubbles_seen = 0;
        clock.run_with(&mut e, 120.0, |e, now| {
            check_arbiter(e, &log);
            // Pop every bubble a second after it shows up.
            let live = log.borrow().live_bubbles();
            bubbles_seen = bubbles_seen.max(live.len());
            if now.timestamp_subsec_millis() == 0 {
                for handle in live {
                    e.bubble_resolved(handle, true, now);
                }
            }
        });
        assert!(bubbles_seen > 0, "seed {seed}: no bubbles");
        let events = e.drain_events();
        assert!(
            count(&events, |ev| matches!(
                ev,
                Event::EffectFired {
                    event: EventType::Flash,
                    ..
                }
            )) > 0,
            "seed {seed}: no flashes"
        );
    }
}

// ============================================================================
// Subliminal
// ============================================================================

#[test]
fn test_subliminal_with_linked_audio() {
    let mut settings = common::quiet_settings();
    settings.subliminal.enabled = true;
    settings.subliminal.audio_enabled = true;
    settings.subliminal.pool = BTreeMap::from([("RELAX".to_string(), true)]);
    let media = common::library().with_linked("RELAX", "snd/relax.wav");
    let (services, log) = common::services(media, 10.0);
    let mut e = Engine::new(settings, services, Some(common::SEED));
    let mut clock = Clock::new();
    e.start(clock.now);

    assert!(e.trigger_event(EventType::Subliminal, false, clock.now));
    {
        let log = log.borrow();
        assert_eq!(
            log.played,
            vec![(PathBuf::from("snd/relax.wav"), AudioChannel::Subliminal)]
        );
        assert!(log.ducked);
        assert!(log.live.is_empty());
    }

    // Text follows the audio after 300 ms and stays for 100 ms.
    clock.run(&mut e, 0.35);
    {
        let log = log.borrow();
        let texts: Vec<_> = log.live.values().collect();
        assert_eq!(
            texts,
            vec![&SurfaceRequest::SubliminalText {
                text: "RELAX".into(),
                opacity: 0.8,
            }]
        );
    }
    clock.run(&mut e, 0.1);
    assert!(log.borrow().live.is_empty());

    clock.run(&mut e, 2.2);
    assert!(!log.borrow().ducked);
    let events = e.drain_events();
    assert_eq!(
        count(&events, |ev| matches!(ev, Event::XpAwarded { .. })),
        2
    );
}

// ============================================================================
// Startle
// ============================================================================

fn startle_settings() -> flashdeck_core::Settings {
    let mut settings = common::quiet_settings();
    settings.startle.enabled = true;
    settings
}

#[test]
fn test_plain_startle_plays_to_idle_and_rearms() {
    let (mut e, log) = common::engine(startle_settings());
    let mut clock = Clock::new();
    e.start(clock.now);
    e.drain_events();

    assert!(e.trigger_event(EventType::Startle, false, clock.now));
    assert_eq!(e.video_phase(), VideoPhase::Preparing);
    assert!(e.counters().video_pending);

    clock.run(&mut e, 4.1);
    assert_eq!(e.video_phase(), VideoPhase::Playing);
    {
        let log = log.borrow();
        assert_eq!(log.opened.len(), 1);
        assert!(log.video_open);
        assert!(log.ducked);
        assert!(log.played.iter().any(|(_, ch)| *ch == AudioChannel::Video));
    }
    assert!(e.counters().video_active);
    assert!(e
        .drain_events()
        .iter()
        .any(|ev| matches!(ev, Event::XpAwarded { amount, .. } if *amount == 50.0)));

    clock.run(&mut e, 11.0);
    assert_eq!(e.video_phase(), VideoPhase::Idle);
    assert!(!e.counters().video_active);
    assert!(!e.snapshot().busy);
    {
        let log = log.borrow();
        assert!(!log.video_open);
        assert!(!log.ducked);
    }
    let events = e.drain_events();
    let idle = events
        .iter()
        .position(|ev| {
            matches!(
                ev,
                Event::VideoPhaseChanged {
                    to: VideoPhase::Idle,
                    ..
                }
            )
        })
        .expect("video never returned to idle");
    assert!(events[idle..].iter().any(|ev| matches!(
        ev,
        Event::EffectArmed {
            event: EventType::Startle,
            ..
        }
    )));
}

#[test]
fn test_panic_during_video_restores_everything() {
    let mut settings = startle_settings();
    settings.flash.enabled = true;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);
    e.trigger_event(EventType::Startle, false, clock.now);
    clock.run(&mut e, 5.0);
    assert_eq!(e.video_phase(), VideoPhase::Playing);

    e.command_sender().send(Command::Panic).unwrap();
    clock.run(&mut e, 0.05);
    assert!(!e.is_running());
    assert_eq!(e.video_phase(), VideoPhase::Idle);
    assert_eq!(*e.counters(), ResourceCounters::default());
    {
        let log = log.borrow();
        assert!(!log.video_open);
        assert!(!log.ducked);
        assert!(!log.host_hidden);
        assert!(log.live.is_empty());
    }
    assert!(e
        .drain_events()
        .iter()
        .any(|ev| matches!(ev, Event::PanicStop { .. })));

    // Nothing scheduled before the panic may run afterwards.
    clock.run(&mut e, 60.0);
    assert!(e.drain_events().is_empty());
    assert_eq!(log.borrow().opened.len(), 1);
    assert_eq!(e.scheduler().queued(), 0);
}

#[test]
fn test_strict_video_blocks_panic_and_hides_host() {
    let mut settings = startle_settings();
    settings.startle.strict = true;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);
    e.trigger_event(EventType::Startle, false, clock.now);
    clock.run(&mut e, 4.1);
    assert_eq!(e.video_phase(), VideoPhase::Playing);
    assert!(log.borrow().host_hidden);

    let tx = e.command_sender();
    tx.send(Command::Panic).unwrap();
    clock.run(&mut e, 0.05);
    assert!(e.is_running());
    assert_eq!(e.video_phase(), VideoPhase::Playing);

    clock.run(&mut e, 11.0);
    assert_eq!(e.video_phase(), VideoPhase::Idle);
    assert!(!log.borrow().host_hidden);

    tx.send(Command::Panic).unwrap();
    clock.run(&mut e, 0.05);
    assert!(!e.is_running());
}

#[test]
fn test_effects_fired_during_video_are_deferred() {
    let mut settings = startle_settings();
    settings.flash.enabled = true;
    settings.bubbles.enabled = true;
    settings.player.level = 20;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);

    e.trigger_event(EventType::Bubble, false, clock.now);
    assert_eq!(log.borrow().live_bubbles().len(), 1);

    e.trigger_event(EventType::Startle, false, clock.now);
    assert!(log.borrow().live_bubbles().is_empty());
    assert_eq!(e.counters().active_bubbles, 0);

    e.trigger_event(EventType::Bubble, false, clock.now);
    e.trigger_event(EventType::Flash, false, clock.now);
    assert!(log.borrow().live.is_empty());
    let deferred = e.snapshot().deferred;
    assert!(deferred.contains(&EventType::Bubble));
    assert!(deferred.contains(&EventType::Flash));
    e.drain_events();

    clock.run(&mut e, 16.0);
    assert_eq!(e.video_phase(), VideoPhase::Idle);
    assert!(e.snapshot().deferred.is_empty());
    let events = e.drain_events();
    for deferred in [EventType::Bubble, EventType::Flash] {
        assert!(
            events
                .iter()
                .any(|ev| matches!(ev, Event::EffectArmed { event, .. } if *event == deferred)),
            "{deferred} not re-armed"
        );
    }
}

// ============================================================================
// Rescheduling
// ============================================================================

#[test]
fn test_rescheduling_never_double_fires() {
    let mut settings = common::quiet_settings();
    settings.flash.enabled = true;
    settings.flash.freq_per_min = 2.0;
    let (mut e, _log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);

    clock.run(&mut e, 10.0);
    for freq in [3.0, 4.0] {
        let mut next = e.settings().clone();
        next.flash.freq_per_min = freq;
        e.update_settings(next, clock.now);
        clock.run(&mut e, 10.0);
    }
    clock.run(&mut e, 60.0);

    let events = e.drain_events();
    let armed = count(&events, |ev| {
        matches!(
            ev,
            Event::EffectArmed {
                event: EventType::Flash,
                ..
            }
        )
    });
    let fired = count(&events, |ev| {
        matches!(
            ev,
            Event::EffectFired {
                event: EventType::Flash,
                ..
            }
        )
    });
    let denied = count(&events, |ev| {
        matches!(
            ev,
            Event::EffectDenied {
                event: EventType::Flash,
                ..
            }
        )
    });
    assert_eq!(
        count(&events, |ev| matches!(ev, Event::Rescheduled { .. })),
        2
    );
    assert!(fired > 0);
    assert!(fired + denied <= armed, "{fired} + {denied} > {armed}");
    assert!(e.scheduler().discarded() > 0);
    assert!(e.scheduler().pending(EventType::Flash).is_some());
}

#[test]
fn test_settings_without_timing_changes_keep_timers() {
    let (mut e, _log) = common::engine(startle_settings());
    let now = common::t0();
    e.start(now);
    let token = e.scheduler().run_token();
    let pending = e.scheduler().pending(EventType::Startle);

    let mut next = e.settings().clone();
    next.audio.volume = 0.9;
    e.update_settings(next, now);
    assert_eq!(e.scheduler().run_token(), token);
    assert_eq!(e.scheduler().pending(EventType::Startle), pending);
}

// ============================================================================
// Hydra clicks
// ============================================================================

#[test]
fn test_clicking_a_corrupted_flash_grows_two_back() {
    let mut settings = common::quiet_settings();
    settings.flash.corruption = true;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);
    e.trigger_event(EventType::Flash, false, clock.now);
    clock.run(&mut e, 0.05);

    let first = log.borrow().live_flashes();
    assert_eq!(first.len(), 1);
    assert!(e.flash_clicked(first[0], clock.now));
    assert!(!e.flash_clicked(first[0], clock.now));

    let live = log.borrow().live_flashes();
    assert_eq!(live.len(), 2);
    assert!(!live.contains(&first[0]));
    check_arbiter(&e, &log);
}

#[test]
fn test_clicking_without_corruption_just_closes() {
    let (mut e, log) = common::engine(common::quiet_settings());
    let mut clock = Clock::new();
    e.start(clock.now);
    e.trigger_event(EventType::Flash, false, clock.now);
    clock.run(&mut e, 0.05);

    let first = log.borrow().live_flashes()[0];
    assert!(e.flash_clicked(first, clock.now));
    assert!(log.borrow().live_flashes().is_empty());
    assert_eq!(e.counters().active_flashes, 0);
}

// ============================================================================
// Launch startle
// ============================================================================

#[test]
fn test_launch_startle_holds_the_loops() {
    let mut settings = common::quiet_settings();
    settings.flash.enabled = true;
    settings.startle.force_on_launch = true;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);
    assert!(e.snapshot().busy);
    assert!(e.scheduler().pending_all().is_empty());

    // A manual startle is refused while the launch one is pending.
    e.trigger_event(EventType::Startle, false, clock.now);
    assert!(e.drain_events().iter().any(|ev| matches!(
        ev,
        Event::EffectDenied {
            event: EventType::Startle,
            reason: DenyReason::Busy,
            ..
        }
    )));

    clock.run(&mut e, 5.05);
    assert_eq!(e.video_phase(), VideoPhase::Preparing);
    assert!(e.snapshot().video.unwrap().strict);

    clock.run(&mut e, 4.0);
    assert_eq!(e.video_phase(), VideoPhase::Playing);
    assert!(log.borrow().host_hidden);

    clock.run(&mut e, 11.0);
    assert_eq!(e.video_phase(), VideoPhase::Idle);
    assert!(!log.borrow().host_hidden);
    assert!(e.scheduler().pending(EventType::Flash).is_some());
}

// ============================================================================
// Time window
// ============================================================================

#[test]
fn test_time_window_starts_and_stops_the_session() {
    use chrono::NaiveDate;

    let mut settings = common::quiet_settings();
    settings.time_window.enabled = true;
    settings.time_window.start = "16:00".into();
    settings.time_window.end = "18:00".into();
    let (mut e, _log) = common::engine(settings);
    let tx = e.command_sender();
    let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let now = common::t0();

    tx.send(Command::ClockCheck(day.and_hms_opt(15, 59, 0).unwrap()))
        .unwrap();
    e.tick(now);
    assert!(!e.is_running());

    tx.send(Command::ClockCheck(day.and_hms_opt(16, 0, 0).unwrap()))
        .unwrap();
    e.tick(now);
    assert!(e.is_running());

    tx.send(Command::ClockCheck(day.and_hms_opt(18, 0, 0).unwrap()))
        .unwrap();
    e.tick(now);
    assert!(!e.is_running());
    let events = e.drain_events();
    assert_eq!(
        count(&events, |ev| matches!(ev, Event::EngineStarted { .. })),
        1
    );
    assert_eq!(
        count(&events, |ev| matches!(ev, Event::EngineStopped { .. })),
        1
    );
}

// ============================================================================
// Heartbeat
// ============================================================================

#[test]
fn test_tint_earns_xp_and_steps_aside_for_video() {
    let mut settings = common::quiet_settings();
    settings.tint.enabled = true;
    settings.player.level = 10;
    let (mut e, log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);

    clock.run(&mut e, 25.0);
    assert!(e.snapshot().tint_visible);
    assert_eq!(
        log.borrow()
            .live_of(|r| matches!(r, SurfaceRequest::Tint { .. }))
            .len(),
        1
    );
    // Two passive points plus two from the tint.
    assert_eq!(e.progress().xp, 4.0);
    assert_eq!(e.settings().player.xp, 4.0);
    assert!(log.borrow().progress_calls >= 4);

    e.trigger_event(EventType::Startle, false, clock.now);
    clock.run(&mut e, 5.0);
    assert_eq!(e.video_phase(), VideoPhase::Playing);
    assert!(!e.snapshot().tint_visible);
    assert!(log
        .borrow()
        .live_of(|r| matches!(r, SurfaceRequest::Tint { .. }))
        .is_empty());

    clock.run(&mut e, 11.0);
    assert_eq!(e.video_phase(), VideoPhase::Idle);
    assert!(e.snapshot().tint_visible);
}

#[test]
fn test_ramp_reports_intensity_every_ten_seconds() {
    let mut settings = common::quiet_settings();
    settings.ramp.enabled = true;
    settings.ramp.duration_min = 1.0;
    settings.ramp.multiplier = 2.0;
    let (mut e, _log) = common::engine(settings);
    let mut clock = Clock::new();
    e.start(clock.now);
    clock.run(&mut e, 30.0);

    let updates: Vec<(f64, f64)> = e
        .drain_events()
        .into_iter()
        .filter_map(|ev| match ev {
            Event::IntensityUpdated {
                progress,
                multiplier,
                ..
            } => Some((progress, multiplier)),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 3);
    assert!(updates.windows(2).all(|w| w[0].0 < w[1].0));
    let (progress, multiplier) = updates[2];
    assert!((progress - 20.05 / 60.0).abs() < 1e-6, "{progress}");
    assert!((multiplier - (1.0 + progress)).abs() < 1e-9);
}
