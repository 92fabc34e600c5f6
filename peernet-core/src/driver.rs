//! Background poll loop: calls [`Session::poll_once`] on a tokio interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::session::{PollStats, Session};

/// Handle to a running poll loop. Dropping it stops the loop at its next tick.
pub struct PollLoop {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<PollStats>,
}

impl PollLoop {
    /// Stop the loop and wait for it. Returns the totals over its lifetime.
    pub async fn stop(mut self) -> PollStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match (&mut self.task).await {
            Ok(totals) => totals,
            Err(e) => {
                warn!(error = %e, "poll loop task failed");
                PollStats::default()
            }
        }
    }

    /// True once the loop has exited, either on request or because the session shut down.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task on the current tokio runtime that polls `session` every `every`.
/// The loop ends when stopped or once the session is shut down.
pub fn spawn_poll_loop(session: Arc<Session>, every: Duration) -> PollLoop {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut totals = PollStats::default();
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => match session.poll_once() {
                    Ok(stats) => totals += stats,
                    Err(e) if e.is_not_initialized() => {
                        debug!("session shut down, poll loop exiting");
                        break;
                    }
                    Err(e) => warn!(error = %e, "poll failed"),
                },
            }
        }
        totals
    });
    PollLoop {
        stop: Some(stop_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::handle::ConnectionHandle;
    use crate::identity::Identity;
    use crate::testing::{status_changed_record, MockNative};
    use crate::types::{ConnectionState, StatusChanged};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn delivers_events_until_stopped() {
        let mock = MockNative::new();
        let session = Arc::new(Session::init(mock.runtime(), SessionConfig::default()).unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        session.set_status_callback(Some(Arc::new(move |_: &StatusChanged| {
            h.fetch_add(1, Ordering::SeqCst);
        })));

        let poller = spawn_poll_loop(Arc::clone(&session), Duration::from_millis(2));
        mock.push_event(status_changed_record(
            ConnectionHandle::from_raw(4),
            &Identity::numeric(1),
            ConnectionState::None,
            ConnectionState::Connecting,
            0,
            "",
        ));
        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;
        assert!(!poller.is_finished());

        let totals = poller.stop().await;
        assert_eq!(totals.dispatched, 1);
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn exits_when_session_shuts_down() {
        let mock = MockNative::new();
        let session = Arc::new(Session::init(mock.runtime(), SessionConfig::default()).unwrap());
        let poller = spawn_poll_loop(Arc::clone(&session), Duration::from_millis(2));
        session.shutdown();
        wait_for(|| poller.is_finished()).await;
        assert_eq!(poller.stop().await, PollStats::default());
    }
}
