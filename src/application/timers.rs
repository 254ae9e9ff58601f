//! Single-shot timers that post back into the control queue

use crate::application::control::ControlMessage;
use crate::domain::shared::value_objects::{SessionId, SessionKey};
use std::time::Duration;
use tokio::sync::mpsc::WeakUnboundedSender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Resend the in-flight tones of a queue, if it is still that generation
    RetryTones { key: SessionKey, generation: u64 },
    /// Re-issue a swap that failed because another one was running
    RetrySwap { owner: SessionKey },
    /// Answer again if the call is still ringing
    RetryAnswer { call: SessionId },
    /// Switch back to the normal route if no call appeared meanwhile
    RouteRevert { generation: u64 },
}

#[cfg_attr(test, mockall::automock)]
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, event: TimerEvent);
}

/// Timers backed by `tokio::time::sleep`.
///
/// Holds only a weak sender so pending timers never keep the control loop
/// alive.
pub struct TokioTimers {
    tx: WeakUnboundedSender<ControlMessage>,
}

impl TokioTimers {
    pub fn new(tx: WeakUnboundedSender<ControlMessage>) -> Self {
        Self { tx }
    }
}

impl TimerScheduler for TokioTimers {
    fn schedule(&self, delay: Duration, event: TimerEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tx.upgrade() {
                Some(tx) => {
                    if tx.send(ControlMessage::Timer(event)).is_err() {
                        tracing::debug!("Control queue closed, timer dropped");
                    }
                }
                None => tracing::debug!("Control queue gone, timer dropped"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_posts_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimers::new(tx.downgrade());

        timers.schedule(
            Duration::from_secs(1),
            TimerEvent::RouteRevert { generation: 3 },
        );

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        match rx.recv().await {
            Some(ControlMessage::Timer(TimerEvent::RouteRevert { generation })) => {
                assert_eq!(generation, 3)
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
