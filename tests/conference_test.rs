//! Conference Integration Tests

use callcore::application::{CallService, Collaborators, ControlHandle};
use callcore::config::Config;
use callcore::domain::call::{CallState, HoldState, MembershipChange, SessionEvent, StateChangeReason};
use callcore::domain::shared::value_objects::SessionId;
use callcore::infrastructure::events::{EventBroadcaster, PublishedEvent};
use callcore::infrastructure::modem::SimulatedModem;
use callcore::CallError;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct TestHarness {
    modem: Arc<SimulatedModem>,
    handle: ControlHandle,
    events: broadcast::Receiver<PublishedEvent>,
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

fn setup_conference_test() -> TestHarness {
    let config = Config::default();
    let modem = Arc::new(SimulatedModem::new(&config.modem));
    let broadcaster = Arc::new(EventBroadcaster::new(256));
    let events = broadcaster.subscribe();

    let (service, handle) =
        CallService::new(&config, Collaborators::new(modem.clone(), broadcaster));
    let task = tokio::spawn(service.run());
    modem.attach(Arc::new(handle.clone()));

    TestHarness {
        modem,
        handle,
        events,
        task,
    }
}

async fn cleanup_conference_test(harness: TestHarness) {
    harness.handle.shutdown().unwrap();
    harness.task.await.unwrap();
}

/// One answered outgoing call on hold and one accepted waiting call
async fn two_calls(h: &TestHarness) -> (SessionId, SessionId) {
    let first = h.handle.dial("5550101").await.unwrap();
    h.modem.remote_answer(&first);
    let second = h.modem.incoming_call("5550102");
    h.handle.accept(second.clone()).await.unwrap();
    h.handle.snapshot().await.unwrap();
    (first, second)
}

#[tokio::test(start_paused = true)]
async fn test_merge_then_member_hangup_ends_conference() {
    let mut h = setup_conference_test();
    let (first, second) = two_calls(&h).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].state, CallState::Held);
    assert_eq!(snapshot.calls[0].hold_state, HoldState::Held);
    assert_eq!(snapshot.calls[1].state, CallState::Active);
    h.drain_events();

    h.handle.merge(second.clone(), first.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    let conference = snapshot.conference.expect("conference after merge");
    assert_eq!(conference.members, vec![first.clone(), second.clone()]);
    assert_eq!(conference.state, CallState::Active);
    for call in &snapshot.calls {
        assert_eq!(call.conference, Some(conference.id));
        assert!(call.multiparty);
        assert_eq!(call.state, CallState::Active);
    }

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::ConferenceCreated {
        conference: conference.id,
        members: vec![first.clone(), second.clone()],
    }));
    assert!(events.contains(&SessionEvent::MergedInto {
        session: first.clone(),
        conference: conference.id,
    }));

    h.modem.remote_hangup(&first);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.conference.is_none());
    assert_eq!(snapshot.calls.len(), 1);
    assert_eq!(snapshot.calls[0].id, second);
    assert_eq!(snapshot.calls[0].conference, None);
    assert!(!snapshot.calls[0].multiparty);

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::MembersChanged {
        conference: conference.id,
        change: MembershipChange::Removed(first.clone()),
        members: vec![second.clone()],
    }));
    assert!(events.contains(&SessionEvent::RemovedFromConference {
        session: second.clone(),
        conference: conference.id,
    }));
    assert!(events.contains(&SessionEvent::ConferenceStateChanged {
        conference: conference.id,
        state: CallState::Ended,
    }));

    cleanup_conference_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_conference_hangup_releases_every_member() {
    let mut h = setup_conference_test();
    let (first, second) = two_calls(&h).await;
    h.handle.merge(first.clone(), second.clone()).await.unwrap();
    let conference = h.handle.snapshot().await.unwrap().conference.unwrap();
    h.drain_events();

    h.handle.hangup(conference.id).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.calls.is_empty());
    assert!(snapshot.conference.is_none());

    let events = h.drain_events();
    for id in [&first, &second] {
        assert!(events.contains(&SessionEvent::CallStateChanged {
            session: id.clone(),
            state: CallState::Ended,
            reason: StateChangeReason::UserRequested,
        }));
    }

    cleanup_conference_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_third_call_joins_and_split_leaves() {
    let h = setup_conference_test();
    let (first, second) = two_calls(&h).await;
    h.handle.merge(first.clone(), second.clone()).await.unwrap();
    let conference = h.handle.snapshot().await.unwrap().conference.unwrap();

    let third = h.modem.incoming_call("5550103");
    h.handle.accept(third.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.conference.as_ref().unwrap().hold_state, HoldState::Held);

    h.handle.merge(conference.id, third.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    let merged = snapshot.conference.unwrap();
    assert_eq!(merged.id, conference.id);
    assert_eq!(merged.members, vec![first.clone(), second.clone(), third.clone()]);
    assert_eq!(merged.hold_state, HoldState::Unheld);

    h.handle.split(first.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    let remaining = snapshot.conference.unwrap();
    assert_eq!(remaining.members, vec![second.clone(), third.clone()]);
    assert_eq!(remaining.hold_state, HoldState::Held);

    let private = snapshot.calls.iter().find(|c| c.id == first).unwrap();
    assert_eq!(private.state, CallState::Active);
    assert_eq!(private.conference, None);

    assert!(matches!(
        h.handle.split(first).await,
        Err(CallError::NotAvailable(_))
    ));

    cleanup_conference_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_split_from_two_member_conference_ends_it() {
    let mut h = setup_conference_test();
    let (first, second) = two_calls(&h).await;
    h.handle.merge(first.clone(), second.clone()).await.unwrap();
    let conference = h.handle.snapshot().await.unwrap().conference.unwrap();
    h.drain_events();

    h.handle.split(first.clone()).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.conference.is_none());
    assert_eq!(snapshot.calls.len(), 2);
    for call in &snapshot.calls {
        assert_eq!(call.conference, None);
        assert!(!call.multiparty);
    }
    let private = snapshot.calls.iter().find(|c| c.id == first).unwrap();
    assert_eq!(private.state, CallState::Active);
    let other = snapshot.calls.iter().find(|c| c.id == second).unwrap();
    assert_eq!(other.state, CallState::Held);

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::ConferenceStateChanged {
        conference: conference.id,
        state: CallState::Ended,
    }));
    for id in [&first, &second] {
        assert!(events.contains(&SessionEvent::RemovedFromConference {
            session: id.clone(),
            conference: conference.id,
        }));
    }

    cleanup_conference_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_conference_hold_swaps_calls() {
    let h = setup_conference_test();
    let (first, second) = two_calls(&h).await;
    h.handle.merge(first, second).await.unwrap();
    let conference = h.handle.snapshot().await.unwrap().conference.unwrap();

    h.handle.request_hold(conference.id, true).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.conference.unwrap().hold_state, HoldState::Held);
    assert!(snapshot.calls.iter().all(|c| c.state == CallState::Held));

    h.handle.request_hold(conference.id, false).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.conference.unwrap().hold_state, HoldState::Unheld);

    cleanup_conference_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_conference_tones_and_mute() {
    let h = setup_conference_test();
    let (first, second) = two_calls(&h).await;
    h.handle.merge(first, second).await.unwrap();
    let conference = h.handle.snapshot().await.unwrap().conference.unwrap();

    h.handle.start_tone(conference.id, 11).await.unwrap();
    h.handle.request_mute(conference.id, true).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(h.modem.sent_tones(), vec!["#"]);
    assert!(snapshot.conference.unwrap().muted);
    assert!(snapshot.calls.iter().all(|c| c.muted));

    cleanup_conference_test(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_merge_needs_two_answered_calls() {
    let h = setup_conference_test();
    let first = h.handle.dial("5550101").await.unwrap();
    h.modem.remote_answer(&first);
    let waiting = h.modem.incoming_call("5550102");

    assert!(matches!(
        h.handle.merge(first, waiting).await,
        Err(CallError::NotAvailable(_))
    ));
    assert!(h.handle.snapshot().await.unwrap().conference.is_none());

    cleanup_conference_test(h).await;
}
