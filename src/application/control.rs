//! Control queue
//!
//! Modem events, timer expiries and session-layer requests all enter one
//! unbounded channel. [`CallService::run`] drains it on a single task, so the
//! registry never sees two messages at once.

use crate::application::registry::{
    CallRegistry, Collaborators, DialReply, RegistrySettings, RegistrySnapshot,
};
use crate::application::timers::{TimerEvent, TokioTimers};
use crate::config::Config;
use crate::domain::audio::AudioOutput;
use crate::domain::modem::{ModemEvent, ModemEventSink};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Handle, SessionId, SessionKey};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum ControlMessage {
    Modem(ModemEvent),
    Timer(TimerEvent),
    Request(SessionRequest),
    Shutdown,
}

/// Requests from the session layer, each with its reply channel
#[derive(Debug)]
pub enum SessionRequest {
    ResolveHandle {
        identity: String,
        reply: Reply<Handle>,
    },
    InspectHandle {
        handle: Handle,
        reply: Reply<Result<String>>,
    },
    CreateSession {
        target: Handle,
        reply: DialReply,
    },
    Hangup {
        key: SessionKey,
        reply: Reply<Result<()>>,
    },
    Accept {
        id: SessionId,
        replacing: bool,
        reply: Reply<Result<()>>,
    },
    RequestHold {
        key: SessionKey,
        hold: bool,
        reply: Reply<Result<()>>,
    },
    RequestMute {
        key: SessionKey,
        muted: bool,
        reply: Reply<Result<()>>,
    },
    StartTone {
        key: SessionKey,
        event: u8,
        reply: Reply<Result<()>>,
    },
    StopTone {
        key: SessionKey,
        reply: Reply<Result<()>>,
    },
    Split {
        id: SessionId,
        reply: Reply<Result<()>>,
    },
    Merge {
        key: SessionKey,
        other: SessionId,
        reply: Reply<Result<()>>,
    },
    SelectAudioOutput {
        output: AudioOutput,
        reply: Reply<Result<()>>,
    },
    HangupAll {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<RegistrySnapshot>,
    },
}

/// Request side of the control queue
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlHandle {
    fn send(&self, message: ControlMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| stopped())
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> SessionRequest) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlMessage::Request(build(tx)))?;
        rx.await.map_err(|_| stopped())
    }

    pub fn post_modem_event(&self, event: ModemEvent) -> Result<()> {
        self.send(ControlMessage::Modem(event))
    }

    /// Stop the control loop after the messages already queued
    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlMessage::Shutdown)
    }

    pub async fn resolve_handle(&self, identity: &str) -> Result<Handle> {
        let identity = identity.to_string();
        self.request(|reply| SessionRequest::ResolveHandle { identity, reply })
            .await
    }

    pub async fn inspect_handle(&self, handle: Handle) -> Result<String> {
        self.request(|reply| SessionRequest::InspectHandle { handle, reply })
            .await?
    }

    pub async fn create_session(&self, target: Handle) -> Result<SessionId> {
        self.request(|reply| SessionRequest::CreateSession { target, reply })
            .await?
    }

    /// Resolve `number` and dial it
    pub async fn dial(&self, number: &str) -> Result<SessionId> {
        let target = self.resolve_handle(number).await?;
        self.create_session(target).await
    }

    pub async fn hangup(&self, key: impl Into<SessionKey>) -> Result<()> {
        let key = key.into();
        self.request(|reply| SessionRequest::Hangup { key, reply })
            .await?
    }

    pub async fn accept(&self, id: SessionId) -> Result<()> {
        self.request(|reply| SessionRequest::Accept {
            id,
            replacing: false,
            reply,
        })
        .await?
    }

    pub async fn accept_replacing(&self, id: SessionId) -> Result<()> {
        self.request(|reply| SessionRequest::Accept {
            id,
            replacing: true,
            reply,
        })
        .await?
    }

    pub async fn request_hold(&self, key: impl Into<SessionKey>, hold: bool) -> Result<()> {
        let key = key.into();
        self.request(|reply| SessionRequest::RequestHold { key, hold, reply })
            .await?
    }

    pub async fn request_mute(&self, key: impl Into<SessionKey>, muted: bool) -> Result<()> {
        let key = key.into();
        self.request(|reply| SessionRequest::RequestMute { key, muted, reply })
            .await?
    }

    pub async fn start_tone(&self, key: impl Into<SessionKey>, event: u8) -> Result<()> {
        let key = key.into();
        self.request(|reply| SessionRequest::StartTone { key, event, reply })
            .await?
    }

    pub async fn stop_tone(&self, key: impl Into<SessionKey>) -> Result<()> {
        let key = key.into();
        self.request(|reply| SessionRequest::StopTone { key, reply })
            .await?
    }

    pub async fn split(&self, id: SessionId) -> Result<()> {
        self.request(|reply| SessionRequest::Split { id, reply })
            .await?
    }

    pub async fn merge(&self, key: impl Into<SessionKey>, other: SessionId) -> Result<()> {
        let key = key.into();
        self.request(|reply| SessionRequest::Merge { key, other, reply })
            .await?
    }

    pub async fn select_audio_output(&self, output: AudioOutput) -> Result<()> {
        self.request(|reply| SessionRequest::SelectAudioOutput { output, reply })
            .await?
    }

    pub async fn hangup_all(&self) -> Result<()> {
        self.request(|reply| SessionRequest::HangupAll { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot> {
        self.request(|reply| SessionRequest::Snapshot { reply })
            .await
    }
}

impl ModemEventSink for ControlHandle {
    fn post(&self, event: ModemEvent) {
        if self.post_modem_event(event).is_err() {
            debug!("Control queue closed, modem event dropped");
        }
    }
}

fn stopped() -> CallError {
    CallError::NotAvailable("call service stopped".to_string())
}

/// Owner of the registry and the receiving end of the control queue
pub struct CallService {
    registry: CallRegistry,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl CallService {
    pub fn new(config: &Config, collaborators: Collaborators) -> (Self, ControlHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Arc::new(TokioTimers::new(tx.downgrade()));
        let registry = CallRegistry::new(RegistrySettings::from(config), collaborators, timers);
        (Self { registry, rx }, ControlHandle { tx })
    }

    /// Drain the queue until shutdown or until every handle is gone
    pub async fn run(mut self) {
        info!("Call service started");
        while let Some(message) = self.rx.recv().await {
            match message {
                ControlMessage::Modem(event) => self.registry.handle_modem_event(event),
                ControlMessage::Timer(event) => self.registry.handle_timer(event),
                ControlMessage::Request(request) => self.handle_request(request),
                ControlMessage::Shutdown => break,
            }
        }
        info!("Call service stopped");
    }

    fn handle_request(&mut self, request: SessionRequest) {
        let registry = &mut self.registry;
        // a dropped reply only means the requester stopped waiting
        match request {
            SessionRequest::ResolveHandle { identity, reply } => {
                let _ = reply.send(registry.resolve_handle(&identity));
            }
            SessionRequest::InspectHandle { handle, reply } => {
                let _ = reply.send(registry.inspect_handle(handle));
            }
            SessionRequest::CreateSession { target, reply } => {
                registry.create_session(target, reply);
            }
            SessionRequest::Hangup { key, reply } => {
                let _ = reply.send(registry.hangup(key));
            }
            SessionRequest::Accept {
                id,
                replacing,
                reply,
            } => {
                let result = if replacing {
                    registry.accept_replacing(id)
                } else {
                    registry.accept(id)
                };
                let _ = reply.send(result);
            }
            SessionRequest::RequestHold { key, hold, reply } => {
                let _ = reply.send(registry.request_hold(key, hold));
            }
            SessionRequest::RequestMute { key, muted, reply } => {
                let _ = reply.send(registry.request_mute(key, muted));
            }
            SessionRequest::StartTone { key, event, reply } => {
                let _ = reply.send(registry.start_tone(key, event));
            }
            SessionRequest::StopTone { key, reply } => {
                let _ = reply.send(registry.stop_tone(key));
            }
            SessionRequest::Split { id, reply } => {
                let _ = reply.send(registry.split(id));
            }
            SessionRequest::Merge { key, other, reply } => {
                let _ = reply.send(registry.merge(key, other));
            }
            SessionRequest::SelectAudioOutput { output, reply } => {
                let _ = reply.send(registry.select_audio_output(output));
            }
            SessionRequest::HangupAll { reply } => {
                registry.hangup_all();
                let _ = reply.send(());
            }
            SessionRequest::Snapshot { reply } => {
                let _ = reply.send(registry.snapshot());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::event::MockSessionListener;
    use crate::domain::modem::MockModemCallService;
    use tokio_test::{assert_err, assert_ok};

    fn service() -> (CallService, ControlHandle) {
        let mut listener = MockSessionListener::new();
        listener.expect_on_event().return_const(());
        let collaborators =
            Collaborators::new(Arc::new(MockModemCallService::new()), Arc::new(listener));
        CallService::new(&Config::default(), collaborators)
    }

    #[tokio::test]
    async fn test_requests_are_answered() {
        let (service, handle) = service();
        let task = tokio::spawn(service.run());

        let target = assert_ok!(handle.resolve_handle("555-1234").await);
        assert_eq!(assert_ok!(handle.inspect_handle(target).await), "5551234");

        let snapshot = assert_ok!(handle.snapshot().await);
        assert!(snapshot.calls.is_empty());
        assert!(!snapshot.network_registered);

        assert_err!(handle.create_session(target).await);
        assert_err!(handle.hangup(SessionId::from("/ril_0/voicecall01")).await);

        assert_ok!(handle.shutdown());
        assert_ok!(task.await);
        assert_err!(handle.snapshot().await);
    }

    #[tokio::test]
    async fn test_run_ends_when_handles_drop() {
        let (service, handle) = service();
        let task = tokio::spawn(service.run());
        drop(handle);
        assert_ok!(task.await);
    }
}
