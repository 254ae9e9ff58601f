//! Call Flow Integration Tests

use callcore::application::{CallService, Collaborators, ControlHandle};
use callcore::config::Config;
use callcore::domain::audio::{AudioOutput, AudioRoute, AudioRouteMediator, PowerState, ProximityMediator};
use callcore::domain::call::{CallState, HoldState, SessionEvent, StateChangeReason};
use callcore::domain::shared::value_objects::SessionKey;
use callcore::infrastructure::events::{EventBroadcaster, PublishedEvent};
use callcore::infrastructure::modem::SimulatedModem;
use callcore::infrastructure::power::LoggingPowerService;
use callcore::CallError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct TestHarness {
    modem: Arc<SimulatedModem>,
    handle: ControlHandle,
    events: broadcast::Receiver<PublishedEvent>,
    power: Arc<LoggingPowerService>,
    task: JoinHandle<()>,
}

impl TestHarness {
    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(published) = self.events.try_recv() {
            events.push(published.event);
        }
        events
    }
}

fn setup_call_test(config: Config) -> TestHarness {
    let modem = Arc::new(SimulatedModem::new(&config.modem));
    let broadcaster = Arc::new(EventBroadcaster::new(256));
    let events = broadcaster.subscribe();
    let power = Arc::new(LoggingPowerService::new());
    let mediator: Arc<dyn AudioRouteMediator> = Arc::new(ProximityMediator::new(power.clone()));

    let collaborators =
        Collaborators::new(modem.clone(), broadcaster).with_route_mediator(mediator);
    let (service, handle) = CallService::new(&config, collaborators);
    let task = tokio::spawn(service.run());
    modem.attach(Arc::new(handle.clone()));

    TestHarness {
        modem,
        handle,
        events,
        power,
        task,
    }
}

async fn cleanup_call_test(harness: TestHarness) {
    harness.handle.shutdown().unwrap();
    harness.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_outgoing_call_lifecycle() {
    let mut h = setup_call_test(Config::default());

    let id = h.handle.dial("555-0100").await.unwrap();
    assert_eq!(h.modem.call_number(&id).as_deref(), Some("5550100"));

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls.len(), 1);
    assert_eq!(snapshot.calls[0].state, CallState::Dialing);
    assert!(!snapshot.calls[0].incoming);
    assert_eq!(snapshot.route, AudioRoute::Earpiece);
    assert_eq!(
        h.power.active_requests(),
        vec![PowerState::ActiveDisplayWithProximityBlanking]
    );

    h.modem.remote_alerting(&id);
    h.modem.remote_answer(&id);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].state, CallState::Active);

    let events = h.drain_events();
    assert!(matches!(
        &events[0],
        SessionEvent::SessionCreated { session, incoming: false, .. } if *session == id
    ));
    assert!(events.contains(&SessionEvent::CallStateChanged {
        session: id.clone(),
        state: CallState::Alerting,
        reason: StateChangeReason::ProgressMade,
    }));
    assert!(events.contains(&SessionEvent::CallStateChanged {
        session: id.clone(),
        state: CallState::Active,
        reason: StateChangeReason::UserRequested,
    }));

    h.modem.remote_hangup(&id);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.calls.is_empty());
    assert!(h.power.active_requests().is_empty());

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::CallStateChanged {
        session: id.clone(),
        state: CallState::Ended,
        reason: StateChangeReason::RemoteHangup,
    }));
    assert!(events.contains(&SessionEvent::SessionClosed {
        key: SessionKey::Call(id.clone()),
    }));

    // route goes back to normal after the revert delay
    assert_eq!(snapshot.route, AudioRoute::Earpiece);
    tokio::time::sleep(Duration::from_millis(600)).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.route, AudioRoute::Normal);

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_incoming_call_is_answered() {
    let mut h = setup_call_test(Config::default());

    let id = h.modem.incoming_call("5550199");
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].state, CallState::Incoming);
    assert!(snapshot.calls[0].incoming);
    assert_eq!(snapshot.route, AudioRoute::Ringtone);

    let target = h.handle.resolve_handle("555 0199").await.unwrap();
    assert_eq!(snapshot.calls[0].target, target);

    h.handle.accept(id.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].state, CallState::Active);

    let states: Vec<CallState> = h
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::CallStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            CallState::Initialized,
            CallState::Incoming,
            CallState::Accepted,
            CallState::Active,
        ]
    );

    h.handle.hangup(id.clone()).await.unwrap();
    h.handle.snapshot().await.unwrap();
    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::CallStateChanged {
        session: id,
        state: CallState::Ended,
        reason: StateChangeReason::UserRequested,
    }));

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_incoming_call() {
    let mut h = setup_call_test(Config::default());

    let id = h.modem.incoming_call("5550199");
    h.modem.remote_hangup(&id);
    h.handle.snapshot().await.unwrap();

    assert!(h.drain_events().contains(&SessionEvent::CallStateChanged {
        session: id,
        state: CallState::Ended,
        reason: StateChangeReason::NoAnswer,
    }));

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_waiting_call_replaces_active() {
    let h = setup_call_test(Config::default());

    let first = h.handle.dial("5550100").await.unwrap();
    h.modem.remote_answer(&first);
    let second = h.modem.incoming_call("5550199");

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[1].state, CallState::Waiting);

    h.handle.accept_replacing(second.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls.len(), 1);
    assert_eq!(snapshot.calls[0].id, second);
    assert_eq!(snapshot.calls[0].state, CallState::Active);

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_hold_and_resume() {
    let mut h = setup_call_test(Config::default());

    let id = h.handle.dial("5550100").await.unwrap();
    h.modem.remote_answer(&id);

    h.handle.request_hold(id.clone(), true).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].state, CallState::Held);
    assert_eq!(snapshot.calls[0].hold_state, HoldState::Held);

    h.handle.request_hold(id.clone(), false).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].state, CallState::Active);
    assert_eq!(snapshot.calls[0].hold_state, HoldState::Unheld);

    let holds: Vec<HoldState> = h
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::HoldStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        holds,
        vec![
            HoldState::PendingHold,
            HoldState::Held,
            HoldState::PendingUnhold,
            HoldState::Unheld,
        ]
    );

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_mute_follows_modem() {
    let h = setup_call_test(Config::default());

    let id = h.handle.dial("5550100").await.unwrap();
    h.modem.remote_answer(&id);

    h.handle.request_mute(id.clone(), true).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.muted);
    assert!(snapshot.calls[0].muted);

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_tones_retry_after_failure() {
    let h = setup_call_test(Config::default());

    let id = h.handle.dial("5550100").await.unwrap();
    h.modem.remote_answer(&id);
    h.modem.fail_next_tones(1);

    for event in [1u8, 2, 3] {
        h.handle.start_tone(id.clone(), event).await.unwrap();
    }
    h.handle.stop_tone(id.clone()).await.unwrap();
    assert!(h.modem.sent_tones().is_empty());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    h.handle.snapshot().await.unwrap();
    assert_eq!(h.modem.sent_tones(), vec!["1", "23"]);

    assert!(matches!(
        h.handle.start_tone(id, 12).await,
        Err(CallError::InvalidArgument(_))
    ));

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_dial_requires_network_except_emergency() {
    let mut config = Config::default();
    config.modem.registered = false;
    let h = setup_call_test(config);

    assert!(matches!(
        h.handle.dial("5550100").await,
        Err(CallError::NotAvailable(_))
    ));
    assert_eq!(h.modem.call_count(), 0);

    let id = h.handle.dial("112").await.unwrap();
    assert_eq!(h.modem.call_number(&id).as_deref(), Some("112"));

    h.modem.set_registered(true);
    h.handle.dial("5550100").await.unwrap();
    assert_eq!(h.modem.call_count(), 2);

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_dial_same_number_reuses_call() {
    let h = setup_call_test(Config::default());

    let first = h.handle.dial("555-0100").await.unwrap();
    let second = h.handle.dial("5550100").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.modem.call_count(), 1);

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_speaker_output_during_call() {
    let h = setup_call_test(Config::default());

    let id = h.handle.dial("5550100").await.unwrap();
    h.modem.remote_answer(&id);

    h.handle.select_audio_output(AudioOutput::Speaker).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.route, AudioRoute::Speaker);
    assert!(snapshot.speaker_mode);
    assert_eq!(h.power.active_requests(), vec![PowerState::ActiveDisplay]);

    assert!(matches!(
        h.handle.select_audio_output(AudioOutput::Bluetooth).await,
        Err(CallError::NotAvailable(_))
    ));

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_new_call_cancels_route_revert() {
    let h = setup_call_test(Config::default());

    let first = h.handle.dial("5550100").await.unwrap();
    h.handle.hangup(first).await.unwrap();
    h.modem.incoming_call("5550199");
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.route, AudioRoute::Ringtone);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.route, AudioRoute::Ringtone);

    cleanup_call_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_hangup_all_on_shutdown() {
    let h = setup_call_test(Config::default());

    let first = h.handle.dial("5550100").await.unwrap();
    h.modem.remote_answer(&first);
    h.modem.incoming_call("5550199");

    h.handle.hangup_all().await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.calls.is_empty());
    assert_eq!(h.modem.call_count(), 0);

    cleanup_call_test(h).await;
}
