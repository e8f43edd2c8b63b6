//! Helpers for observing [`SessionEvent`]s in tests.

use std::time::Duration;

use relink::SessionEvent;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};

/// Deadline for any single awaited event or connection.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Receive the next event.
///
/// # Panics
///
/// Panics if no event arrives within [`EVENT_TIMEOUT`], if the receiver
/// lagged, or if the session was dropped.
pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    match tokio::time::timeout(EVENT_TIMEOUT, events.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(RecvError::Lagged(skipped))) => panic!("event receiver lagged by {skipped}"),
        Ok(Err(RecvError::Closed)) => panic!("session dropped"),
        Err(_) => panic!("timed out waiting for an event"),
    }
}

/// Skip events until one called `name` arrives and return it.
///
/// Names are those reported by [`SessionEvent::name`].
///
/// # Panics
///
/// Panics under the same conditions as [`next_event`].
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    name: &str,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if event.name() == name {
            return event;
        }
    }
}

/// Collect every event already queued, without waiting.
pub fn drain_events(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
        }
    }
}
